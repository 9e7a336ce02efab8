mod adapter;
mod http;
mod memory;
mod retry;
mod schema;
mod traits;

pub use adapter::{PushOutcome, SyncAdapter};
pub use http::HttpRemote;
pub use memory::MemoryRemote;
pub use retry::RetryPolicy;
pub use schema::parse_remote_blob;
pub use traits::{PutOutcome, RemoteDocument, RemoteStore};
