pub mod codec;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod heartbeat;
pub mod identity;
pub mod packet;
pub mod rr;

pub use codec::{marshal, unmarshal};
pub use constants::*;
pub use error::{CodecError, IdentityError};
pub use exchange::{ExchangeRequest, ExchangeResponse};
pub use heartbeat::Heartbeat;
pub use identity::{address, parse_keypair_hex, parse_public_hex};
pub use packet::{Packet, METHOD_POST};
pub use rr::PacketRr;
