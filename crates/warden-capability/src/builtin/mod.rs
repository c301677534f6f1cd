//! Leaf capability modules with no host dependencies.
//!
//! Modules that need the network driver or the filesystem live in
//! `warden-net` and `warden-fs`; everything here can be bound as a ready
//! value in any catalog.

mod bit;
mod buffer;
mod crypto;
mod hash;
mod io;
mod random;
mod regexp;
mod store;
mod time;

pub use bit::BitModule;
pub use buffer::{Buffer, BufferModule};
pub use crypto::{HashAlgorithm, HashModule, HmacModule};
pub use hash::{CrcModule, CrcWidth};
pub use io::{ReaderModule, StringReader, StringWriter, WriterModule};
pub use random::RandModule;
pub use regexp::{Regexp, RegexpModule};
pub use store::StoreModule;
pub use time::TimeModule;
