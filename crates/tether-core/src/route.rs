use std::fmt;

use crate::config::CarrierSpec;

/// 一条逻辑连接的来源描述：发送端名、接收端名与载体说明。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 握手期间由连接状态持有，载体只在需要时做少量标注，例如 WebSocket 载体把发送端名改写为 `web`；
/// - 载体字段保存完整的连接说明串（如 `unix_stream+ack`），裸载体名通过
///   [`Route::carrier_name`] 获取，选项通过 [`Route::carrier_spec`] 解析。
///
/// ## 合同（What）
/// - 所有 `with_*` 方法返回新值，原值保持不变；
/// - `Display` 输出 `from -> to (carrier)`，用于日志字段。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    from: String,
    to: String,
    carrier: String,
}

impl Route {
    pub fn new(from: impl Into<String>, to: impl Into<String>, carrier: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            carrier: carrier.into(),
        }
    }

    pub fn from_name(&self) -> &str {
        &self.from
    }

    pub fn to_name(&self) -> &str {
        &self.to
    }

    /// 完整的载体说明串，包含 `+` 限定符。
    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// 去掉限定符后的载体名。
    pub fn carrier_name(&self) -> &str {
        self.carrier
            .split_once('+')
            .map(|(name, _)| name)
            .unwrap_or(&self.carrier)
    }

    /// 解析载体说明串。
    pub fn carrier_spec(&self) -> CarrierSpec {
        CarrierSpec::parse(&self.carrier)
    }

    pub fn with_from_name(&self, from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..self.clone()
        }
    }

    /// 替换载体名，同时保留原说明串中的限定符。
    pub fn with_carrier_name(&self, name: &str) -> Self {
        let carrier = match self.carrier.split_once('+') {
            Some((_, qualifiers)) => format!("{name}+{qualifiers}"),
            None => name.to_owned(),
        };
        Self {
            carrier,
            ..self.clone()
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.carrier)
    }
}
