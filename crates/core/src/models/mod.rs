//! # 数据模型
//!
//! 定义提取编排系统的核心数据结构：处理请求、工作区、提取任务与结果、
//! 追加日志条目以及活动执行上下文。
//!
//! ## 核心模型
//!
//! ### ProcessRequest - 处理请求
//! 一次顶层作业的不可变输入，作用域为一次根流水线运行。
//!
//! ### Workspace - 工作区
//! 绑定在单个工作节点上的私有目录对（根文件槽 + 工作目录）以及亲和性键。
//! 工作目录不会复制到其他节点，因此所有读写它的活动都必须在同一节点执行。
//!
//! ### ExtractionTask / ExtractionResult - 提取任务与结果
//! 一个提取工作单元及其产出：终态产物和新发现的嵌入对象。
//!
//! ### RelayEntry - 追加日志条目
//! 提取引擎直接写入追加日志的发现记录，按单调递增的 `EntryId` 被中继消费。
//!
//! ## 设计原则
//!
//! - 所有模型实现 `serde::Serialize` / `serde::Deserialize`，可写入检查点
//! - 定位符在解析时校验，结构错误归类为不可重试
//! - 日志游标 `EntryId` 全序，保证转发顺序可比较

pub mod activity;
pub mod extraction;
pub mod locator;
pub mod relay;
pub mod request;
pub mod workspace;

pub use activity::ActivityContext;
pub use extraction::{ArtifactRef, ExtractionOutcome, ExtractionResult, ExtractionTask};
pub use locator::ObjectLocator;
pub use relay::{EntryId, RelayEntry, RelayKey};
pub use request::{parse_output_kinds, OutputKind, ProcessRequest};
pub use workspace::{target_dir_in, AffinityKey, Workspace};
