//! Basic coedit Example
//!
//! Two users edit the same assignment concurrently; the second proposal is
//! rebased over the first, and a third proposal that lands inside deleted
//! text is rejected with a conflict.
//!
//! Run with: cargo run -p coedit-core --example basic

use coedit_core::{
    ContentEntity, DocumentId, DocumentManager, EngineConfig, EntityKind, Operation, RebaseWindow,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("coedit Basic Example\n");

    let manager = DocumentManager::with_config(EngineConfig {
        rebase_window: RebaseWindow::Unseen,
        ..EngineConfig::default()
    });
    let mut updates = manager.subscribe();

    let id = DocumentId::new("course:bio101:assignment:3")?;
    let entity = ContentEntity::new(EntityKind::Assignment)
        .with_field("title", "Lab report")?
        .with_field("instructions", "Describe the experiment.")?;
    manager.create(id.clone(), entity).await?;

    // Both users last saw version 0
    manager
        .submit(&id, Operation::insert("instructions", 0, "Carefully ").by("alice"))
        .await?;
    let commit = manager
        .submit(&id, Operation::replace("instructions", 13, 23, "procedure").by("bob"))
        .await?;
    println!("bob's replace rebased to {:?}", commit.operations[0].range());

    let snapshot = manager.snapshot(&id).await?;
    println!("instructions: {}", snapshot.text("instructions")?);

    // Alice deletes a word; Carol, still at version 0, types inside it
    manager
        .submit(&id, Operation::delete("title", 0, 4).by("alice"))
        .await?;
    match manager
        .submit(&id, Operation::insert("title", 2, "x").by("carol"))
        .await
    {
        Ok(_) => println!("carol's insert committed"),
        Err(e) => println!("carol's insert rejected: {}", e),
    }

    while let Ok(event) = updates.try_recv() {
        println!("commit v{} by {}", event.version, event.user_id);
    }

    println!("\nDocuments:");
    for meta in manager.list(None) {
        println!("  - {} (kind: {}, version: {})", meta.id, meta.kind, meta.version);
    }

    Ok(())
}
