use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "CONVGATE_PORT",
            "CONVGATE_DATA_DIR",
            "CONVGATE_RETENTION_SECS",
            "CONVGATE_SWEEP_SECS",
            "CONVGATE_TOOL_TIMEOUT_SECS",
            "CONVGATE_FFMPEG",
            "CONVGATE_SOFFICE",
            "CONVGATE_ARCHIVE_TARGETS",
            "CONVGATE_MAX_EXTRACTED_BYTES",
            "RUST_LOG",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
