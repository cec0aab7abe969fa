mod capabilities;
mod changes;
mod commands;
mod dispatcher;
mod host_cache;
mod metrics;
mod mysql;
mod pfs_metrics;
mod processlist;
mod replay;
mod replication;
mod sampler;
mod worker;
// only functions
pub mod options;
pub mod queries;
pub mod ui;

pub use capabilities::ConnectionSource;
pub use capabilities::ServerCapabilities;
pub use capabilities::ServerFeature;
pub use changes::ChangeMonitor;
pub use changes::VariableChange;
pub use commands::CommandRequest;
pub use commands::CommandWorker;
pub use dispatcher::Action;
pub use dispatcher::CommandGuard;
pub use dispatcher::Dispatcher;
pub use dispatcher::InfoCommand;
pub use host_cache::load_host_cache_file;
pub use host_cache::HostCache;
pub use metrics::MetricSnapshot;
pub use metrics::MetricStore;
pub use metrics::METRIC_GROUPS;
pub use mysql::Database;
pub use mysql::Endpoint;
pub use mysql::ScalarValue;
pub use mysql::TlsMode;
pub use pfs_metrics::PfsMetrics;
pub use processlist::KillPredicate;
pub use processlist::Thread;
pub use processlist::ThreadFilter;
pub use replay::ReplayReader;
pub use replay::ReplayRecorder;
pub use replication::ReplicaTracker;
pub use sampler::PanelVisibility;
pub use sampler::RawSample;
pub use sampler::Sampler;
pub use worker::TabEvent;
pub use worker::TabManager;
pub use worker::TabRuntime;
pub use worker::TabSnapshot;
