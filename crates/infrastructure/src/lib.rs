//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_record_gateway;
mod http_response;
mod http_upload_transport;
mod in_memory_record_gateway;
mod tracing_notice_sink;

pub use http_record_gateway::{HttpRecordGateway, USER_HEADER};
pub use http_upload_transport::{HttpUploadTransport, UPLOAD_CHUNK_BYTES};
pub use in_memory_record_gateway::InMemoryRecordGateway;
pub use tracing_notice_sink::TracingNoticeSink;
