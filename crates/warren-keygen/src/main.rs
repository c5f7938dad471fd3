use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// Generate a fresh warren identity and print it. The public key, hex
/// encoded, is the node's mesh address; the keypair is what goes into the
/// daemons' identity flag.
fn main() {
    let key = SigningKey::generate(&mut OsRng);

    println!(
        "PUBLIC KEY: {}\nPRIVATE KEY: {}",
        hex::encode(key.verifying_key().to_bytes()),
        hex::encode(key.to_keypair_bytes()),
    );
}
