pub mod bugreport;
pub mod client;
pub mod server;
pub mod version;

pub const SERVER_SUBCOMMAND: &str = "server";
pub const SERVER_DESCRIPTION: &str = "Run the conversion gateway";

pub const CONVERT_SUBCOMMAND: &str = "convert";
pub const CONVERT_DESCRIPTION: &str = "Convert a local file through a running gateway";

pub const FORMATS_SUBCOMMAND: &str = "formats";
pub const FORMATS_DESCRIPTION: &str = "List the target formats a gateway offers per category";

pub const VERSION_SUBCOMMAND: &str = "version";
pub const VERSION_DESCRIPTION: &str = "Display the version and build information";

pub const BUGREPORT_SUBCOMMAND: &str = "bugreport";
pub const BUGREPORT_DESCRIPTION: &str = "Collect information about the system and the environment for a bug report";

pub const DEFAULT_URI: &str = "http://localhost:5000";
