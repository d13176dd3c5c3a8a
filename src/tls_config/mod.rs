//! TLS ClientHello 配置模块
//!
//! 提供 `ClientHelloSpec`（密码套件、扩展顺序、版本范围）、各浏览器的
//! Spec 工厂、GREASE 处理、ClientHello 序列化与解析、JA4 指纹生成。

mod grease;
mod ja4;
mod parser;
mod spec;

pub use grease::{
    filter_grease_values, is_grease_value, GreasePolicy, GREASE_PLACEHOLDER, TLS_GREASE_VALUES,
};
pub use ja4::Ja4Fingerprint;
pub use parser::ParsedClientHello;
pub use spec::{
    ClientHelloSpec, EchOffer, HelloParams, PskOffer, TransportMode, VERSION_TLS12, VERSION_TLS13,
};
