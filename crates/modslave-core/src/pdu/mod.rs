pub mod exception;
pub mod function_code;
pub mod request;

pub use exception::ExceptionCode;
pub use function_code::FunctionCode;
pub use request::Request;
