//! Conversions between a single buffered Claude message and its streamed
//! form, used by the broadcaster to serve subscribers whose requested
//! `stream` flag differs from the producer's upstream call.

mod message_to_stream;
mod stream_to_message;

pub use message_to_stream::streamify_message;
pub use stream_to_message::StreamToMessage;
