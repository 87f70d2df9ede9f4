pub mod activity;
pub mod aggregator;
pub mod expansion;
pub mod history;
pub mod pipeline;
pub mod relay;

pub use activity::{ActivityExecutor, ActivityOptions, ActivityStats};
pub use aggregator::{
    aggregator_channel, AggregationReport, AggregationState, AggregatorHandle, AggregatorInbox,
    ResultAggregator,
};
pub use expansion::{
    expansion_channel, ExpansionCheckpoint, ExpansionController, ExpansionEvent, ExpansionHandle,
    ExpansionReport, ExpansionSettings, ExpansionState,
};
pub use history::{Checkpointed, HistoryBudget};
pub use pipeline::{PipelineDeps, PipelineReport, RootCheckpoint, RootPipeline};
pub use relay::{
    relay_channel, OutputRelay, RelayCheckpoint, RelayHandle, RelayReport, RelaySettings,
    RelayState,
};
