use log::LevelFilter;

use super::config::CONFIG;

const MODULES: [&str; 3] = ["reaper", "cmd", "tools"];

/// numeric `log_level` of the config, 0 being the most verbose
fn level_filter(log_level: u8) -> LevelFilter {
    match log_level {
        #[cfg(debug_assertions)]
        0 => LevelFilter::Trace,
        #[cfg(not(debug_assertions))]
        0 => LevelFilter::Debug,
        1 => LevelFilter::Debug,
        2 => LevelFilter::Info,
        3 => LevelFilter::Warn,
        4 => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// setup logger, then load the config and apply its level
///
/// The logger comes first so that loading the config is logged too.
pub fn init() {
    let mut builder = env_logger::Builder::new();
    for module in MODULES {
        builder.filter_module(module, LevelFilter::Trace);
    }
    builder.try_init().ok();
    log::set_max_level(LevelFilter::Info);

    log::set_max_level(level_filter(CONFIG.log_level));
    set_panic_hook();
}

/// a panic in any task aborts `reap`, children must not outlive a broken reaper
fn set_panic_hook() {
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|x| x.to_string()).unwrap_or_default();
        log::error!("reap panicked at {}", location);
        default_panic(info);
        std::process::exit(1);
    }));
}
