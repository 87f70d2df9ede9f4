use std::future::Future;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use extractor_core::models::{parse_output_kinds, ProcessRequest};
use extractor_core::{init_logging, AppConfig, LogFormat};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

mod app;

use app::Application;

#[derive(Parser, Debug)]
#[command(name = "extractor")]
#[command(version = "1.0.0")]
#[command(about = "递归内容提取编排系统")]
#[command(long_about = "下载输入对象，提取文本、元数据及嵌入对象，可递归处理嵌入对象，最后打包上传")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 配置文件路径，未指定时按默认路径查找
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// 日志格式 (json|pretty)，覆盖配置文件
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 处理单个输入对象
    Process(ProcessArgs),
    /// 把多个已有对象合并为一个输出
    Collect(CollectArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// 输入对象定位符，如 object://bucket/input.docx
    #[arg(short, long)]
    input: String,
    /// 输出对象定位符
    #[arg(short, long)]
    output: String,
    /// MIME 类型提示
    #[arg(long)]
    mime: Option<String>,
    /// 输出类型，逗号分隔：text,metadata,pdf,embedded
    #[arg(long)]
    kinds: Option<String>,
    /// 递归处理嵌入对象
    #[arg(long)]
    recurse: bool,
    /// 运行标识；用中断的运行的标识再次提交时从检查点继续
    #[arg(long)]
    run_id: Option<String>,
}

#[derive(Args, Debug)]
struct CollectArgs {
    /// 输出对象定位符
    #[arg(short, long)]
    output: String,
    /// 要合并的对象定位符
    #[arg(required = true)]
    inputs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("默认路径")
        )
    })?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = format.parse::<LogFormat>()?;
    }
    config.logging.validate()?;
    init_logging(&config.logging)?;

    info!("启动递归内容提取编排系统");
    let app = Application::new(config).await?;

    match cli.command {
        Commands::Process(args) => {
            let request = build_request(args)?;
            info!("处理请求: {} -> {}", request.input, request.output);
            let report = run_until_shutdown(app.process(&request)).await?;
            print_report(&report)
        }
        Commands::Collect(args) => {
            info!("合并 {} 个对象到 {}", args.inputs.len(), args.output);
            let report = run_until_shutdown(app.collect(&args.output, &args.inputs)).await?;
            print_report(&report)
        }
    }
}

fn build_request(args: ProcessArgs) -> Result<ProcessRequest> {
    let mut request = ProcessRequest::new(args.input, args.output).with_recurse(args.recurse);
    if let Some(mime) = args.mime {
        request = request.with_mimetype(mime);
    }
    if let Some(kinds) = args.kinds {
        let kinds = parse_output_kinds(&kinds).context("解析输出类型失败")?;
        request = request.with_output_kinds(kinds);
    }
    if let Some(run_id) = args.run_id {
        request = request.with_run_id(run_id);
    }
    request.validate_run_id()?;
    Ok(request)
}

/// 运行直到完成或收到关闭信号；收到信号时丢弃未完成的运行，后台组件随之中止
///
/// 被中止的运行不清理工作区和检查点，可以用同一个运行标识继续。
async fn run_until_shutdown<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = work => {
            if let Err(e) = &result {
                error!("运行失败: {e:#}");
            }
            result
        }
        _ = wait_for_shutdown_signal() => {
            warn!("收到关闭信号，中止当前运行");
            Err(anyhow::anyhow!("运行被关闭信号中止"))
        }
    }
}

fn print_report<T: Serialize>(report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("序列化运行报告失败")?;
    println!("{json}");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extractor_core::models::OutputKind;

    #[test]
    fn test_parse_process_command() {
        let cli = Cli::try_parse_from([
            "extractor",
            "process",
            "--input",
            "object://in/mail.pst",
            "--output",
            "object://out/mail.zip",
            "--kinds",
            "text,metadata",
            "--recurse",
            "--run-id",
            "case-42",
            "-l",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));

        let Commands::Process(args) = cli.command else {
            panic!("expected process command");
        };
        let request = build_request(args).unwrap();
        assert!(request.recurse);
        assert_eq!(request.run_id.as_deref(), Some("case-42"));
        assert_eq!(
            request.output_kinds,
            vec![OutputKind::Text, OutputKind::Metadata]
        );
        assert_eq!(
            request.root_output_kinds(),
            vec![OutputKind::Text, OutputKind::Metadata, OutputKind::Embedded]
        );
    }

    #[test]
    fn test_unknown_output_kind_rejected() {
        let args = ProcessArgs {
            input: "object://in/a.doc".to_string(),
            output: "object://out/a.zip".to_string(),
            mime: None,
            kinds: Some("text,html".to_string()),
            recurse: false,
            run_id: None,
        };
        assert!(build_request(args).is_err());
    }

    #[test]
    fn test_run_id_with_path_separator_rejected() {
        let args = ProcessArgs {
            input: "object://in/a.doc".to_string(),
            output: "object://out/a.zip".to_string(),
            mime: None,
            kinds: None,
            recurse: true,
            run_id: Some("../a".to_string()),
        };
        assert!(build_request(args).is_err());
    }

    #[test]
    fn test_collect_requires_inputs() {
        assert!(Cli::try_parse_from(["extractor", "collect", "--output", "object://o/x"]).is_err());
        let cli = Cli::try_parse_from([
            "extractor",
            "collect",
            "--output",
            "object://o/x.zip",
            "object://p/a",
            "object://p/b",
        ])
        .unwrap();
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect command");
        };
        assert_eq!(args.inputs.len(), 2);
    }
}
