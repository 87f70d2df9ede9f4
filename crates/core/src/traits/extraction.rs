//! 提取接口定义
//!
//! ## 核心概念
//!
//! ### ExtractionEngine
//! 外部提取引擎的适配层：识别 MIME、产出文本/元数据/渲染结果，并切分嵌入对象。
//! 大型树的嵌入对象可以由引擎直接写入追加日志，而不是内联返回。
//!
//! ### ExtractionActivity
//! 编排层看到的提取活动：调用引擎并规范化结果，使所有递归都经过中继。

use async_trait::async_trait;

use crate::errors::ExtractorResult;
use crate::models::{ActivityContext, ExtractionOutcome, ExtractionResult, ExtractionTask};

#[async_trait]
pub trait ExtractionEngine: Send + Sync {
    /// 对单个文件执行提取，长时间运行时应通过 `ctx` 上报心跳
    async fn extract(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
    ) -> ExtractorResult<ExtractionResult>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait ExtractionActivity: Send + Sync {
    async fn run(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
    ) -> ExtractorResult<ExtractionOutcome>;
}
