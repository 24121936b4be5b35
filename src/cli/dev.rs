use brisk::bundle::PluginManager;
use brisk::dev::DevServer;
use std::path::PathBuf;

pub async fn run(config: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (_, mut config) = super::load_config(config.as_deref())?;
    if let Some(port) = port {
        config.dev.port = port;
    }

    let server = DevServer::new(config, PluginManager::new())?;
    server.run().await?;
    Ok(())
}
