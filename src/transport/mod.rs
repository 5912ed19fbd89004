mod event_source;
mod http_transport;

pub use event_source::spawn_event_source;
pub use http_transport::{HttpTransport, CHAT_COMPLETIONS_PATH};
