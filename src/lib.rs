pub mod api;
pub mod core;

/// Install the platform logger. Safe to call more than once.
pub fn init_logging() {
    #[cfg(target_os = "android")]
    {
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag("vision_gateway"),
        );
    }

    #[cfg(not(target_os = "android"))]
    {
        // RUST_LOG overrides the default level
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
    }
}
