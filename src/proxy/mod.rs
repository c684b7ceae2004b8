pub mod collection;
pub mod connection;
pub mod credentials;
pub mod middleware;
pub mod transport;

pub use collection::{CollectionMember, ProxyCollection, ProxyEntry};
pub use connection::ConnectionProxy;
pub use credentials::CredentialBinder;
pub use transport::{ProxyTransport, StreamableResponse};
