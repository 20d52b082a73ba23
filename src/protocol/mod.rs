pub mod codec;
pub mod errno;
pub mod opcode;
pub mod stat;

pub use codec::{decode, encode, encode_response, Response, ResponseHeader};
pub use opcode::Opcode;
pub use stat::Stat;
