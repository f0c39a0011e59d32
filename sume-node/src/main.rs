#[tokio::main]
async fn main() {
    if let Err(e) = sume_node::run().await {
        eprintln!("sume-node: {}", e);
        std::process::exit(1);
    }
}
