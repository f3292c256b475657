use log::error;

use call_signaling_server::config::Config;
use call_signaling_server::state::ServerState;
use call_signaling_server::{server, sweeper};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env();
    let shared = ServerState::shared(config);

    tokio::spawn(sweeper::run(shared.clone()));

    if let Err(e) = server::run(shared).await {
        error!("server error: {}", e);
    }
}
