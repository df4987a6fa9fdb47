//! Cache in front of a slow backend.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example cache
//!
//! The first lookup misses the cache and goes to the backend; the cache's
//! response handler stores the user on the way back. The second lookup is
//! answered by the cache and never reaches the backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use layerline::{Chain, Layer, Run, middleware};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct User {
    id: u32,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), layerline::Error> {
    tracing_subscriber::fmt::init();

    let cache: Arc<Mutex<HashMap<u32, User>>> = Arc::default();

    let users = Chain::named("users")
        .register(middleware::trace("edge"))
        .register(cache_layer(Arc::clone(&cache)))
        .register(Layer::new().on_request(fetch_user));

    for _ in 0..2 {
        let user = users.invoke(42)?.await?;
        println!("{} -> {}", user.id, user.name);
    }

    Ok(())
}

fn cache_layer(cache: Arc<Mutex<HashMap<u32, User>>>) -> Layer<u32, User> {
    let store = Arc::clone(&cache);

    Layer::new()
        .on_request(move |run: Run<u32, User>| {
            let cache = Arc::clone(&cache);
            async move {
                let id = run.input().unwrap_or_default();
                let hit = cache.lock().get(&id).cloned();
                match hit {
                    Some(user) => run.resolve(user),
                    None => run.advance().await,
                }
            }
        })
        .on_response(move |user: User| {
            store.lock().insert(user.id, user.clone());
            std::future::ready(user)
        })
}

// Pretend this is a database round trip.
async fn fetch_user(run: Run<u32, User>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    let id = run.input().unwrap_or_default();
    run.resolve(User { id, name: format!("user-{id}") });
}
