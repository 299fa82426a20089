pub mod draw_map;
pub mod parse_osm;
pub mod shapes;
pub mod tikz;

use std::path::Path;
use log::{info, error};

use crate::config::UserConfig;
use crate::errors::Result;

use self::draw_map::DrawMapEtl;
use self::parse_osm::ParseOsmEtl;
use self::shapes::ShapesEtl;
use self::tikz::TikzEtl;


pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
        } else {
            info!(etl_name = self.etl_name(); "Extracting");
            let input = match self.extract(dir) {
                Ok(input) => Ok(input),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Extraction failed with error");
                    Err(err)
                },
            }?;

            info!(etl_name = self.etl_name(); "Transforming");
            let output = match self.transform(input) {
                Ok(output) => Ok(output),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Transformation failed with error");
                    Err(err)
                },
            }?;

            info!(etl_name = self.etl_name(); "Loading");
            match self.load(dir, output) {
                Ok(_) => Ok(()),
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message.as_str(); "Loading failed with error");
                    Err(err)
                },
            }?;
        }
        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }
}

fn run_stage(etl: &mut impl Etl, dir: &Path, rebuild: bool) -> Result<()> {
    if rebuild {
        etl.clean(dir)?;
    }
    etl.process(dir)
}

/// Runs every stage in order, each reading what the previous one left in `dir`.
pub fn run_pipeline(config: &UserConfig, dir: &Path) -> Result<()> {
    run_stage(&mut ParseOsmEtl::new(config), dir, config.rebuild)?;
    run_stage(&mut ShapesEtl::new(config), dir, config.rebuild)?;
    run_stage(&mut DrawMapEtl::new(config)?, dir, config.rebuild)?;
    run_stage(&mut TikzEtl::new(config), dir, config.rebuild)?;
    Ok(())
}
