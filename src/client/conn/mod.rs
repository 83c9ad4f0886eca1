//! 针对具体传输协议的连接器实现

pub mod http2;
