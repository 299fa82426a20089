mod clip;
mod config;
mod data;
mod errors;
mod etl;
mod table;

use std::fs::create_dir_all;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use crate::config::{load_user_config, UserConfig};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::run_pipeline;


fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let input_fname = config.data_path
        .file_name()
        .ok_or_else(|| Error::new(ErrorKind::Config, "Could not get input file name"))?;
    let output_dir = config.output_root.join(input_fname);
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    setup_logging();

    // Without a config file the fixed project layout is used.
    let user_config = match std::env::args().nth(1) {
        Some(path) => load_user_config(Path::new(&path))?,
        None => UserConfig::default(),
    };
    let output_dir = create_output_dir(&user_config)?;
    let output_dir_str = output_dir.display().to_string();
    info!(output_dir = output_dir_str.as_str(); "Running pipeline");

    run_pipeline(&user_config, &output_dir)
}
