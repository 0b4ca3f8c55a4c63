use anyhow::Result;

use kubeconsole::{
    app::App,
    cmd::Command,
    config::Config,
    logging::Logger,
};

fn main() -> Result<()> {
    let cmd = Command::init();

    let config = Config::load(cmd.config_load_option()?)?;

    if cmd.logging {
        Logger::init(config.logging.path.clone())?;
    }

    App::run(cmd, config)
}
