//! Two peers on one TCP connection, each exposing a method the other can
//! call. Run with `cargo run -p birpc-transport --example greeter`.

use std::sync::Arc;

use birpc_core::{Endpoint, Extensions, HandlerError, Registry};
use birpc_transport::JsonFramedCodec;
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        if let Err(err) = run_peer(stream, server_registry(), "Greeting.Greet", "server").await {
            eprintln!("server peer error: {err}");
        }
    });

    let client_stream = TcpStream::connect(addr).await?;
    run_peer(client_stream, client_registry(), "Greeting.Greet", "client").await?;

    // The client side returning drops its half of the connection; the
    // server's reader observes EOF and its own `serve()` exits on its own.
    // `abort` just bounds the example's runtime in case that race is slow.
    server.abort();
    Ok(())
}

fn server_registry() -> Registry {
    Registry::builder()
        .method("Greeting.Greet", |name: String, _ext: Extensions| async move {
            Ok::<_, HandlerError>(format!("hello from the server, {name}"))
        })
        .unwrap()
        .build()
}

fn client_registry() -> Registry {
    Registry::builder()
        .method("Greeting.Greet", |name: String, _ext: Extensions| async move {
            Ok::<_, HandlerError>(format!("hello from the client, {name}"))
        })
        .unwrap()
        .build()
}

async fn run_peer(
    stream: TcpStream,
    registry: Registry,
    method: &str,
    who: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let codec = JsonFramedCodec::new(stream).with_peer_label(who);
    let endpoint = Endpoint::new(codec, registry);

    let serve = tokio::spawn({
        let endpoint = Arc::clone(&endpoint);
        async move { endpoint.serve().await }
    });

    let reply: String = endpoint.call(method, &who.to_string()).await?;
    println!("{who} received: {reply}");

    drop(endpoint);
    serve.abort();
    Ok(())
}
