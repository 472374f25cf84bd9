use std::env;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct VersionInfo {
    pub name: String,
    pub version: String,
    pub os: String,
    pub architecture: String,
    pub categories: Vec<String>,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            name: clap::crate_name!().to_string(),
            version: clap::crate_version!().to_string(),
            os: env::consts::OS.to_string(),
            architecture: env::consts::ARCH.to_string(),
            categories: kernel::Category::ALL
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

pub fn run(json: bool) {
    let info = VersionInfo::current();

    if json {
        match serde_json::to_string_pretty(&info) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("version info not serialized: {e}"),
        }
        return;
    }

    println!("Name           : {}", info.name);
    println!("Version        : {}", info.version);
    println!("OS             : {}", info.os);
    println!("Architecture   : {}", info.architecture);
    println!("Categories     : {}", info.categories.join(", "));
}
