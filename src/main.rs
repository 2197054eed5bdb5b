use renogy_bridge::options::Options;

#[tokio::main]
async fn main() {
    let options = Options::new();

    if let Err(err) = renogy_bridge::run(options).await {
        eprintln!("renogy-bridge: {:?}", err);
        std::process::exit(255);
    }
}
