use crate::monitor::processlist::KillPredicate;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Informational commands run on the secondary connection by a dedicated
/// worker; they never touch the sampler.
#[derive(Clone, Debug, PartialEq)]
pub enum InfoCommand {
    Variables { search: Option<String> },
    Users,
    Databases,
    InnodbStatus,
    MemoryUsage,
    TableSizes,
    ThreadDetails { thread_id: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterTarget {
    User,
    Host,
    Db,
    Hostgroup,
    MinimumQueryTime,
    QueryText,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    TogglePanel(&'static str),
    ForceRefresh,
    TogglePause,
    ReplayBack,
    ReplayForward,
    ReplaySeek,
    NewTab,
    RemoveTab,
    SwitchTabNext,
    SwitchTabPrevious,
    RenameTab,
    SetFilter(FilterTarget),
    ClearFilters,
    KillThread,
    KillByPredicate(KillPredicate),
    ToggleIdleThreads,
    ToggleTrxsOnly,
    ToggleTicketedOnly,
    ToggleSortOrder,
    Info(InfoCommand),
}

struct Command {
    key: &'static str,
    description: &'static str,
    action: fn() -> Action,
    /// Usable while replaying a file.
    replay: bool,
    /// Needs the secondary connection.
    uses_secondary: bool,
}

static COMMANDS: &[Command] = &[
    Command { key: "1", description: "Toggle dashboard panel", action: || Action::TogglePanel("dashboard"), replay: true, uses_secondary: false },
    Command { key: "2", description: "Toggle processlist panel", action: || Action::TogglePanel("processlist"), replay: true, uses_secondary: false },
    Command { key: "3", description: "Toggle graphs panel", action: || Action::TogglePanel("graphs"), replay: true, uses_secondary: false },
    Command { key: "4", description: "Toggle replication panel", action: || Action::TogglePanel("replication"), replay: true, uses_secondary: false },
    Command { key: "5", description: "Toggle locks panel", action: || Action::TogglePanel("locks"), replay: true, uses_secondary: false },
    Command { key: "6", description: "Toggle DDL panel", action: || Action::TogglePanel("ddl"), replay: false, uses_secondary: false },
    Command { key: "7", description: "Toggle performance schema metrics panel", action: || Action::TogglePanel("pfs_metrics"), replay: false, uses_secondary: false },
    Command { key: "8", description: "Toggle statements summary panel", action: || Action::TogglePanel("statements_summary"), replay: false, uses_secondary: false },
    Command { key: " ", description: "Refresh immediately", action: || Action::ForceRefresh, replay: true, uses_secondary: false },
    Command { key: "p", description: "Pause/resume refresh", action: || Action::TogglePause, replay: true, uses_secondary: false },
    Command { key: "[", description: "Replay: step backward", action: || Action::ReplayBack, replay: true, uses_secondary: false },
    Command { key: "]", description: "Replay: step forward", action: || Action::ReplayForward, replay: true, uses_secondary: false },
    Command { key: "S", description: "Replay: seek to timestamp", action: || Action::ReplaySeek, replay: true, uses_secondary: false },
    Command { key: "+", description: "Open a new tab", action: || Action::NewTab, replay: false, uses_secondary: false },
    Command { key: "-", description: "Remove the current tab", action: || Action::RemoveTab, replay: true, uses_secondary: false },
    Command { key: "n", description: "Switch to the next tab", action: || Action::SwitchTabNext, replay: true, uses_secondary: false },
    Command { key: "N", description: "Switch to the previous tab", action: || Action::SwitchTabPrevious, replay: true, uses_secondary: false },
    Command { key: "R", description: "Rename the current tab", action: || Action::RenameTab, replay: true, uses_secondary: false },
    Command { key: "f", description: "Filter processlist by user", action: || Action::SetFilter(FilterTarget::User), replay: true, uses_secondary: false },
    Command { key: "F", description: "Clear processlist filters", action: || Action::ClearFilters, replay: true, uses_secondary: false },
    Command { key: "k", description: "Kill thread by id", action: || Action::KillThread, replay: false, uses_secondary: true },
    Command { key: "K", description: "Kill threads by predicate", action: || Action::KillByPredicate(KillPredicate { user: None, host: None, age_range: None, query_text: None, include_sleeping: false }), replay: false, uses_secondary: true },
    Command { key: "i", description: "Toggle idle threads", action: || Action::ToggleIdleThreads, replay: false, uses_secondary: false },
    Command { key: "T", description: "Toggle transactions-only", action: || Action::ToggleTrxsOnly, replay: true, uses_secondary: false },
    Command { key: "c", description: "Toggle concurrency-ticketed only", action: || Action::ToggleTicketedOnly, replay: true, uses_secondary: false },
    Command { key: "s", description: "Toggle sort order", action: || Action::ToggleSortOrder, replay: true, uses_secondary: false },
    Command { key: "v", description: "Show global variables", action: || Action::Info(InfoCommand::Variables { search: None }), replay: false, uses_secondary: true },
    Command { key: "u", description: "Show connected users", action: || Action::Info(InfoCommand::Users), replay: false, uses_secondary: true },
    Command { key: "d", description: "Show databases", action: || Action::Info(InfoCommand::Databases), replay: false, uses_secondary: true },
    Command { key: "e", description: "Show latest deadlock", action: || Action::Info(InfoCommand::InnodbStatus), replay: false, uses_secondary: true },
    Command { key: "m", description: "Show memory usage breakdown", action: || Action::Info(InfoCommand::MemoryUsage), replay: false, uses_secondary: true },
    Command { key: "z", description: "Show table sizes", action: || Action::Info(InfoCommand::TableSizes), replay: false, uses_secondary: true },
    Command { key: "t", description: "Show thread details", action: || Action::Info(InfoCommand::ThreadDetails { thread_id: String::new() }), replay: false, uses_secondary: true },
];

pub fn commands() -> impl Iterator<Item = (&'static str, &'static str)> {
    return COMMANDS.iter().map(|c| (c.key, c.description));
}

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Keys that trigger expensive operations debounce harder.
fn debounce_interval(key: &str) -> Duration {
    match key {
        "[" | "]" => Duration::from_millis(100),
        " " => Duration::from_millis(300),
        "-" => Duration::from_millis(300),
        _ => DEFAULT_DEBOUNCE,
    }
}

/// Current tab state the dispatcher checks before letting a command run.
#[derive(Clone, Debug, Default)]
pub struct CommandGuard {
    pub hostgroup_wave_in_progress: bool,
    pub secondary_busy: bool,
    pub connected: bool,
    pub replay_mode: bool,
    pub modal_open: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    Run(Action),
    Debounced,
    Blocked(&'static str),
    Unknown,
}

/// Debounced keystroke->action mapping. The debounce happens before any guard
/// so a held-down key cannot flood notifications either.
#[derive(Default)]
pub struct Dispatcher {
    last_key_time: HashMap<String, Instant>,
}

impl Dispatcher {
    pub fn new() -> Self {
        return Self::default();
    }

    pub fn dispatch(&mut self, key: &str, guard: &CommandGuard) -> DispatchOutcome {
        return self.dispatch_at(key, Instant::now(), guard);
    }

    fn dispatch_at(&mut self, key: &str, now: Instant, guard: &CommandGuard) -> DispatchOutcome {
        if let Some(last) = self.last_key_time.get(key) {
            if now.duration_since(*last) < debounce_interval(key) {
                return DispatchOutcome::Debounced;
            }
        }
        self.last_key_time.insert(key.to_string(), now);

        let Some(command) = COMMANDS.iter().find(|c| c.key == key) else {
            return DispatchOutcome::Unknown;
        };

        if guard.modal_open {
            return DispatchOutcome::Blocked("A modal screen is open");
        }
        if guard.hostgroup_wave_in_progress {
            return DispatchOutcome::Blocked(
                "You can't run commands while hosts are connecting as a hostgroup",
            );
        }
        if guard.replay_mode && !command.replay {
            return DispatchOutcome::Blocked("This command is not available during replay");
        }
        if !guard.replay_mode && !guard.connected {
            return DispatchOutcome::Blocked("You must be connected to a host to use commands");
        }
        if command.uses_secondary && guard.secondary_busy {
            return DispatchOutcome::Blocked(
                "There's already a command running - please wait for it to finish",
            );
        }

        return DispatchOutcome::Run((command.action)());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connected_guard() -> CommandGuard {
        CommandGuard {
            connected: true,
            ..Default::default()
        }
    }

    fn replay_guard() -> CommandGuard {
        CommandGuard {
            replay_mode: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_debounce_replay_step() {
        // Three presses of '[' within 150 ms produce exactly two steps: one at
        // t=0 and one at t=100ms; the middle press is dropped.
        let mut dispatcher = Dispatcher::new();
        let guard = replay_guard();
        let start = Instant::now();

        let first = dispatcher.dispatch_at("[", start, &guard);
        let second = dispatcher.dispatch_at("[", start + Duration::from_millis(50), &guard);
        let third = dispatcher.dispatch_at("[", start + Duration::from_millis(100), &guard);

        assert_eq!(first, DispatchOutcome::Run(Action::ReplayBack));
        assert_eq!(second, DispatchOutcome::Debounced);
        assert_eq!(third, DispatchOutcome::Run(Action::ReplayBack));
    }

    #[test]
    fn test_debounce_default_interval() {
        let mut dispatcher = Dispatcher::new();
        let guard = connected_guard();
        let start = Instant::now();

        assert_eq!(
            dispatcher.dispatch_at("p", start, &guard),
            DispatchOutcome::Run(Action::TogglePause)
        );
        assert_eq!(
            dispatcher.dispatch_at("p", start + Duration::from_millis(20), &guard),
            DispatchOutcome::Debounced
        );
        assert_eq!(
            dispatcher.dispatch_at("p", start + Duration::from_millis(80), &guard),
            DispatchOutcome::Run(Action::TogglePause)
        );
    }

    #[test]
    fn test_force_refresh_has_loose_debounce() {
        let mut dispatcher = Dispatcher::new();
        let guard = connected_guard();
        let start = Instant::now();

        assert_eq!(
            dispatcher.dispatch_at(" ", start, &guard),
            DispatchOutcome::Run(Action::ForceRefresh)
        );
        assert_eq!(
            dispatcher.dispatch_at(" ", start + Duration::from_millis(200), &guard),
            DispatchOutcome::Debounced
        );
        assert_eq!(
            dispatcher.dispatch_at(" ", start + Duration::from_millis(320), &guard),
            DispatchOutcome::Run(Action::ForceRefresh)
        );
    }

    #[test]
    fn test_disconnected_blocks_commands() {
        let mut dispatcher = Dispatcher::new();
        let outcome = dispatcher.dispatch_at("v", Instant::now(), &CommandGuard::default());
        assert_eq!(
            outcome,
            DispatchOutcome::Blocked("You must be connected to a host to use commands")
        );
    }

    #[test]
    fn test_replay_blocks_live_only_commands() {
        let mut dispatcher = Dispatcher::new();
        let outcome = dispatcher.dispatch_at("k", Instant::now(), &replay_guard());
        assert_eq!(
            outcome,
            DispatchOutcome::Blocked("This command is not available during replay")
        );
    }

    #[test]
    fn test_secondary_busy_blocks_info_commands() {
        let mut dispatcher = Dispatcher::new();
        let mut guard = connected_guard();
        guard.secondary_busy = true;

        let outcome = dispatcher.dispatch_at("v", Instant::now(), &guard);
        assert_eq!(
            outcome,
            DispatchOutcome::Blocked(
                "There's already a command running - please wait for it to finish"
            )
        );
        // Non-secondary commands still work.
        let outcome = dispatcher.dispatch_at("p", Instant::now(), &guard);
        assert_eq!(outcome, DispatchOutcome::Run(Action::TogglePause));
    }

    #[test]
    fn test_hostgroup_wave_blocks_everything() {
        let mut dispatcher = Dispatcher::new();
        let mut guard = connected_guard();
        guard.hostgroup_wave_in_progress = true;

        assert!(matches!(
            dispatcher.dispatch_at("p", Instant::now(), &guard),
            DispatchOutcome::Blocked(_)
        ));
    }

    #[test]
    fn test_unknown_key() {
        let mut dispatcher = Dispatcher::new();
        assert_eq!(
            dispatcher.dispatch_at("!", Instant::now(), &connected_guard()),
            DispatchOutcome::Unknown
        );
    }
}
