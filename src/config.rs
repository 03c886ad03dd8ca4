use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // provider table json, the bundled table is used when this isn't set
    #[clap(long, env)]
    pub providers_path: Option<PathBuf>,

    // residential relay, both of these or neither
    #[clap(long, env)]
    pub relay_base_url: Option<String>,

    #[clap(long, env, hide_env_values = true)]
    pub relay_secret: Option<String>,

    // one budget for the whole resolve, siblings and mirrors included
    #[clap(long, env, default_value = "20")]
    pub resolve_timeout_secs: u64,

    #[clap(long, env, default_value = "256")]
    pub max_concurrent_requests: usize,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl Default for AppConfig {
    // defaults aren't really needed here but it's here as a bad fallback
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            cors_origin: "*".to_string(),
            providers_path: None,
            relay_base_url: None,
            relay_secret: None,
            resolve_timeout_secs: 20,
            max_concurrent_requests: 256,
            sentry_dsn: None,
        }
    }
}
