use std::io::{self, Write};

use position_probe::{module_name_from_env, providers, run};
use positioner::{init_logging, PositionerConfig};

fn main() -> io::Result<()> {
    let config = PositionerConfig::from_env().map_err(io::Error::other)?;
    init_logging(config.log_filter.as_deref()).map_err(io::Error::other)?;

    let server = providers::provider_from_env().map_err(io::Error::other)?;
    let report = run(server.as_ref(), &module_name_from_env(), &config).map_err(io::Error::other)?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report).map_err(io::Error::other)?;
    writeln!(stdout)
}
