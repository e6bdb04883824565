pub mod headers;
pub mod request;
pub mod response;

pub use headers::HeaderMap;
pub use request::{parse_request, BodyReader, Method, RequestMeta};
pub use response::{get_mime_type, status_text, ResponseFrame};
