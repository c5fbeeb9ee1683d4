//! 连接说明串解析、运行时目录解析与传输配置。
//!
//! # 教案级说明
//! - **意图 (Why)**：载体选项（如 `+ack`）必须在发送首部之前确定；Unix 会合路径依赖的运行时目录
//!   需要在进程启动时解析一次并显式传入各载体，而不是散落在各处读取环境变量。
//! - **契约 (What)**：
//!   - [`CarrierSpec::parse`] 永不失败：空名称回落为 `tcp`，未知限定符原样保留；
//!   - [`resolve_runtime_dir`] 的解析顺序为显式覆盖变量 → XDG 运行时目录 → `/tmp/runtime-<user>`；
//!   - [`TransportConfig::validate`] 拒绝非法数值，错误类型为 [`TransportError::Config`]。
//! - **注意事项 (Trade-offs)**：环境读取经由 [`Environment`] trait 注入，测试无需修改真实进程环境。

use std::{collections::BTreeMap, fs, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::error::{Operation, Result, TransportError};

/// 未显式指定载体时使用的默认载体名。
pub const DEFAULT_CARRIER: &str = "tcp";

/// 显式覆盖运行时目录的环境变量。
pub const RUNTIME_DIR_ENV: &str = "TETHER_RUNTIME_DIR";

/// 运行时目录下的子目录名。
pub const RUNTIME_SUBDIR: &str = "tether";

/// 载体限定符集合：`flag` 形式的开关与 `key.value` 形式的键值对。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CarrierOptions {
    flags: Vec<String>,
    values: BTreeMap<String, String>,
}

impl CarrierOptions {
    /// 开关是否存在，例如 `ack`。
    pub fn flag(&self, name: &str) -> bool {
        self.flags.iter().any(|flag| flag == name)
    }

    /// 键值限定符，例如 `send.mjpeg` 中的 `send`。
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn with_flag(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.flag(&name) {
            self.flags.push(name);
        }
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.values.is_empty()
    }
}

/// 解析后的连接说明串：载体名加限定符。
///
/// 语法为 `name(+qualifier)*`，限定符要么是开关 `ack`，要么是 `key.value`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CarrierSpec {
    name: String,
    options: CarrierOptions,
}

impl CarrierSpec {
    pub fn parse(spec: &str) -> Self {
        let mut parts = spec.split('+');
        let name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_CARRIER)
            .to_owned();
        let mut options = CarrierOptions::default();
        for qualifier in parts.map(str::trim).filter(|q| !q.is_empty()) {
            options = match qualifier.split_once('.') {
                Some((key, value)) => options.with_value(key, value),
                None => options.with_flag(qualifier),
            };
        }
        Self { name, options }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CarrierOptions {
        &self.options
    }
}

/// 环境变量来源。
pub trait Environment {
    fn var(&self, key: &str) -> Option<String>;
}

/// 读取真实进程环境。
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

impl Environment for BTreeMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|value| !value.is_empty()).cloned()
    }
}

/// 按顺序解析运行时目录，不触碰文件系统。
///
/// 1. `TETHER_RUNTIME_DIR`（原样使用）；
/// 2. `$XDG_RUNTIME_DIR/tether`；
/// 3. `/tmp/runtime-$USER/tether`，`USER` 缺失时使用 `/tmp/runtime/tether`。
pub fn resolve_runtime_dir(env: &dyn Environment) -> PathBuf {
    if let Some(explicit) = env.var(RUNTIME_DIR_ENV) {
        return PathBuf::from(explicit);
    }
    if let Some(xdg) = env.var("XDG_RUNTIME_DIR") {
        return PathBuf::from(xdg).join(RUNTIME_SUBDIR);
    }
    let base = match env.var("USER") {
        Some(user) => format!("/tmp/runtime-{user}"),
        None => "/tmp/runtime".to_owned(),
    };
    PathBuf::from(base).join(RUNTIME_SUBDIR)
}

/// 一次性解析得到的运行时目录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeDirConfig {
    path: PathBuf,
}

impl RuntimeDirConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn resolve(env: &dyn Environment) -> Self {
        Self::new(resolve_runtime_dir(env))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// 确保目录存在。
    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.path).map_err(|err| TransportError::io(Operation::Configure, err))
    }
}

/// 传输层可调参数。
///
/// # 教案级说明
/// - **Why**：会合重试次数、监听队列长度等常量需要在测试中缩短或放大，
///   因此集中到一个可由 TOML 加载的结构里；
/// - **What**：未出现的字段取默认值（与历史行为一致：5 次尝试、间隔 100ms、backlog 2）；
/// - **How**：`serde(default)` + [`TransportConfig::from_toml_str`]，加载后立即调用
///   [`TransportConfig::validate`]。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub runtime_dir: Option<PathBuf>,
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
    pub listen_backlog: i32,
    pub tcp_nodelay: bool,
    pub tcp_linger_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            connect_attempts: 5,
            connect_retry_delay_ms: 100,
            listen_backlog: 2,
            tcp_nodelay: true,
            tcp_linger_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| TransportError::config(err.message().to_owned()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_attempts == 0 {
            return Err(TransportError::config("connect_attempts must be at least 1"));
        }
        if self.listen_backlog < 1 {
            return Err(TransportError::config("listen_backlog must be at least 1"));
        }
        Ok(())
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn tcp_linger(&self) -> Option<Duration> {
        self.tcp_linger_ms.map(Duration::from_millis)
    }

    /// 显式配置优先，否则按环境解析。
    pub fn runtime_dir(&self, env: &dyn Environment) -> RuntimeDirConfig {
        match &self.runtime_dir {
            Some(path) => RuntimeDirConfig::new(path.clone()),
            None => RuntimeDirConfig::resolve(env),
        }
    }
}
