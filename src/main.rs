use betaportal_lib::commands::settings::load_portal_settings;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = match load_portal_settings() {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Failed to load settings: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = betaportal_lib::start_server(settings).await {
        log::error!("Feedback portal exited with error: {e}");
        std::process::exit(1);
    }
}
