//! Semantic conventions for Trace2 reporting.
//!
//! These spellings are wire-observable; downstream dashboards and queries
//! key on them, so they must be preserved exactly.

/// Value of the `service.namespace` resource attribute.
pub const TRACE2_SERVICE_NAMESPACE: &str = "trace2";

/// Value of the `instrumentation.name` resource attribute.
pub const TRACE2_INSTRUMENTATION_NAME: &str = "trace2receiver";

/// The complete Trace2 SID of the process, slashes and all.
pub const TRACE2_CMD_SID: &str = "trace2.cmd.sid";

/// The complete command line of the process.
pub const TRACE2_CMD_ARGV: &str = "trace2.cmd.argv";

/// Version string of the executable from the "version" event.
pub const TRACE2_CMD_VERSION: &str = "trace2.cmd.version";

/// Exit code; 128+signo when the process was signalled.
pub const TRACE2_CMD_EXIT_CODE: &str = "trace2.cmd.exit_code";

/// Base filename of the executable (`git`, `git-remote-https`).
pub const TRACE2_CMD_NAME: &str = "trace2.cmd.name";

/// Executable and verb with normalized formatting (`git:checkout`).
pub const TRACE2_CMD_NAME_VERB: &str = "trace2.cmd.name_verb";

/// Executable, verb, and mode (`git:checkout#branch`).
pub const TRACE2_CMD_NAME_VERB_MODE: &str = "trace2.cmd.name_verb_mode";

/// Verb hierarchy as reported by Git (`fetch/index-pack`).
pub const TRACE2_CMD_HIERARCHY: &str = "trace2.cmd.hierarchy";

/// Format string and message of one error from the command.
pub const TRACE2_CMD_ERR_FMT: &str = "trace2.cmd.error.format";
pub const TRACE2_CMD_ERR_MSG: &str = "trace2.cmd.error.message";

pub const TRACE2_CMD_ALIAS_KEY: &str = "trace2.cmd.alias.key";
pub const TRACE2_CMD_ALIAS_VALUE: &str = "trace2.cmd.alias.value";

/// Invoking process chain ("bash", "sshd", ...), possibly truncated.
pub const TRACE2_CMD_ANCESTRY: &str = "trace2.cmd.ancestry";

/// Trace2 classification of the span: "process", "thread", "child", or
/// "region".
pub const TRACE2_SPAN_TYPE: &str = "trace2.span.type";

pub const TRACE2_CHILD_PID: &str = "trace2.child.pid";
pub const TRACE2_CHILD_EXIT_CODE: &str = "trace2.child.exitcode";
pub const TRACE2_CHILD_ARGV: &str = "trace2.child.argv";
pub const TRACE2_CHILD_CLASS: &str = "trace2.child.class";
pub const TRACE2_CHILD_HOOK_NAME: &str = "trace2.child.hook";
pub const TRACE2_CHILD_READY_STATE: &str = "trace2.child.ready";

pub const TRACE2_REGION_MESSAGE: &str = "trace2.region.message";
pub const TRACE2_REGION_NESTING: &str = "trace2.region.nesting";
pub const TRACE2_REGION_REPO_ID: &str = "trace2.region.repoid";
pub const TRACE2_REGION_DATA: &str = "trace2.region.data";

pub const TRACE2_EXEC_EXE: &str = "trace2.exec.exe";
pub const TRACE2_EXEC_ARGV: &str = "trace2.exec.argv";
pub const TRACE2_EXEC_EXIT_CODE: &str = "trace2.exec.exitcode";

pub const TRACE2_REPO_SET: &str = "trace2.repo.set";
pub const TRACE2_PARAM_SET: &str = "trace2.param.set";

pub const TRACE2_REPO_NICKNAME: &str = "trace2.repo.nickname";

pub const TRACE2_PROCESS_DATA: &str = "trace2.process.data";
pub const TRACE2_PROCESS_TIMERS: &str = "trace2.process.timers";
pub const TRACE2_PROCESS_COUNTERS: &str = "trace2.process.counters";
pub const TRACE2_PROCESS_SUMMARY: &str = "trace2.process.summary";

pub const TRACE2_THREAD_TIMERS: &str = "trace2.thread.timers";
pub const TRACE2_THREAD_COUNTERS: &str = "trace2.thread.counters";

pub const TRACE2_MACHINE_ARCH: &str = "trace2.machine.arch";
pub const TRACE2_MACHINE_OS: &str = "trace2.machine.os";

pub const TRACE2_PII_HOSTNAME: &str = "trace2.pii.hostname";
pub const TRACE2_PII_USERNAME: &str = "trace2.pii.username";
