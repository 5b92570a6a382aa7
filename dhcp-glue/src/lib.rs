//! Small pieces of OS plumbing shared by the server and client daemons:
//! writing and locking a PID file, detaching from the controlling
//! terminal, and invoking the external script/notify hook.

pub mod daemonize;
pub mod pidfile;
pub mod script;

pub use daemonize::daemonize;
pub use pidfile::PidFile;
pub use script::run_hook;
