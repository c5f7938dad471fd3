//! Host facts reported in heartbeats. Collected once at startup; anything
//! that cannot be determined degrades to a placeholder rather than failing.

#[derive(Debug, Clone)]
pub struct HostFacts {
    pub os: String,
    pub arch: String,
    pub hostname: String,
    pub user: String,
    pub user_id: String,
}

const UNKNOWN: &str = "<unknown>";

pub fn collect() -> HostFacts {
    HostFacts {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        hostname: hostname().unwrap_or_else(|| UNKNOWN.to_string()),
        user: username().unwrap_or_else(|| UNKNOWN.to_string()),
        user_id: user_id().unwrap_or_else(|| UNKNOWN.to_string()),
    }
}

fn hostname() -> Option<String> {
    #[cfg(unix)]
    {
        command_output("hostname", &[])
    }
    #[cfg(windows)]
    {
        std::env::var("COMPUTERNAME").ok()
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}

fn username() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

fn user_id() -> Option<String> {
    #[cfg(unix)]
    {
        command_output("id", &["-u"])
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(unix)]
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let out = std::process::Command::new(program).args(args).output().ok()?;
    let text = String::from_utf8(out.stdout).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
