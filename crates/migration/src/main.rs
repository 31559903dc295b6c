use config::Config;
use sea_orm_migration::prelude::*;
use std::env;

const CONFIG_PATH_ENV: &str = "FEDERATED_OIDC_CONFIG";

#[tokio::main]
async fn main() {
    // DATABASE_URL wins over the server configuration file
    if env::var("DATABASE_URL").is_err() {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.yaml".to_string());
        let settings = Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .build();
        if let Ok(url) = settings.and_then(|s| s.get_string("database_url")) {
            env::set_var("DATABASE_URL", url);
        }
    }
    cli::run_cli(migration::Migrator).await;
}
