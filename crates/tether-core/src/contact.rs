use std::{
    fmt,
    hash::{Hash, Hasher},
    net::{IpAddr, SocketAddr},
};

/// `Contact` 描述一个端点的身份：主机、端口与载体名。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协商阶段需要知道两端的地址元数据，例如 Unix 载体依据双方端口推导会合路径，
///   并要求两端位于同一主机；
/// - 与 `std::net::SocketAddr` 相比，`Contact` 额外记录载体名，且允许主机名为任意字符串
///   （例如内存流使用的 `memory`）。
///
/// ## 合同（What）
/// - 不可变值类型：构造后只能通过 [`Contact::with_carrier`] 生成副本；
/// - 相等性与哈希只比较 `host` + `port`，载体名不参与比较；
/// - `Display` 输出 `carrier:/host:port`，载体名为空时省略前缀。
///
/// ## 设计权衡（Trade-offs）
/// - 主机名以字符串保存，不做 DNS 解析；[`Contact::is_same_host`] 只把回环地址视为等价，
///   不尝试识别同一主机的多个网卡地址。
#[derive(Clone, Debug, Default, Eq)]
pub struct Contact {
    host: String,
    port: u16,
    carrier: String,
}

impl Contact {
    /// 以主机与端口构造，载体名为空。
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            carrier: String::new(),
        }
    }

    /// 返回替换载体名后的副本。
    pub fn with_carrier(&self, carrier: impl Into<String>) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            carrier: carrier.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn carrier(&self) -> &str {
        &self.carrier
    }

    /// 判断两个端点是否位于同一主机。
    ///
    /// - 主机字符串完全相同即视为同一主机；
    /// - 两端都能解析为回环地址（`127.0.0.0/8`、`::1`）或均为 `localhost` 时同样成立。
    pub fn is_same_host(&self, other: &Contact) -> bool {
        if self.host == other.host {
            return !self.host.is_empty();
        }
        is_loopback(&self.host) && is_loopback(&other.host)
    }

    /// 尝试转换为标准库地址；主机不是 IP 字面量时返回 `None`。
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.host.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }
}

fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Hash for Contact {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.carrier.is_empty() {
            write!(f, "{}:/", self.carrier)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl From<SocketAddr> for Contact {
    fn from(addr: SocketAddr) -> Self {
        Contact::new(addr.ip().to_string(), addr.port())
    }
}
