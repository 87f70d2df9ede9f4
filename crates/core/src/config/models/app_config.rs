use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};

use super::{
    orchestrator::OrchestratorConfig,
    storage::{ObjectStoreConfig, RelayLogBackend, RelayLogConfig, WorkspaceConfig},
    worker::WorkerConfig,
};
use crate::errors::{ExtractorError, ExtractorResult};
use crate::logging::LogConfig;
use crate::retry::RetryPolicy;

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/extractor.toml",
    "extractor.toml",
    "/etc/extractor/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub orchestrator: OrchestratorConfig,
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub relay_log: RelayLogConfig,
    pub object_store: ObjectStoreConfig,
    pub workspace: WorkspaceConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: EXTRACTOR_, nested keys separated by `__`)
    pub fn load(config_path: Option<&str>) -> ExtractorResult<Self> {
        Self::load_with_env(config_path, None)
    }

    /// 与 [`AppConfig::load`] 相同，但可以用给定的映射代替进程环境变量
    pub fn load_with_env(
        config_path: Option<&str>,
        env_overrides: Option<Map<String, String>>,
    ) -> ExtractorResult<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(ExtractorError::config_error(format!(
                        "配置文件不存在: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("EXTRACTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env_overrides),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> ExtractorResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| ExtractorError::config_error(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> ExtractorResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ExtractorError::config_error(format!("序列化配置为TOML失败: {e}")))
    }

    pub fn validate(&self) -> ExtractorResult<()> {
        let sections: [(&str, ExtractorResult<()>); 7] = [
            ("编排", self.orchestrator.validate()),
            ("重试策略", self.retry.validate()),
            ("Worker", self.worker.validate()),
            ("追加日志", self.relay_log.validate()),
            ("对象存储", self.object_store.validate()),
            ("工作区", self.workspace.validate()),
            ("日志", self.logging.validate()),
        ];
        for (name, result) in sections {
            result.map_err(|e| ExtractorError::config_error(format!("{name}配置验证失败: {e}")))?;
        }
        // 持久化的检查点引用的追加日志必须同样能在进程重启后存在
        if self.orchestrator.checkpoint_dir.is_some()
            && self.relay_log.backend == RelayLogBackend::Memory
        {
            return Err(ExtractorError::config_error(
                "设置 checkpoint_dir 时追加日志后端不能是 memory",
            ));
        }
        Ok(())
    }
}
