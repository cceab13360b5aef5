use clap::Parser;
use vkngine_app::AppArgs;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    vkngine_core::init();
    vkngine_graphics::init();
    vkngine_app::init();

    let args = AppArgs::parse();
    if let Err(e) = vkngine_app::run(args) {
        e.terminate();
    }
}
