// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use rollcall_app::{
    BlockId, BlockLeaves, HierarchyStore, LeafFetchRequest, RequestToken, leaves_from_documents,
    leaves_from_map_field,
};
use std::collections::HashSet;
use std::sync::mpsc;
use std::thread;

/// Outcome of one block fetch, tagged with the token it was started under.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockFetch {
    pub token: RequestToken,
    pub block: BlockId,
    pub result: Result<BlockLeaves, String>,
}

/// Reads one block's leaves. A block record carrying a non-null map field is
/// read as a map-field block; anything else is listed as a document
/// collection.
pub fn fetch_block<S>(store: &S, request: &LeafFetchRequest) -> Result<BlockLeaves>
where
    S: HierarchyStore + ?Sized,
{
    let record = store
        .get_record(&request.record)
        .with_context(|| format!("read block record {}", request.record))?;
    if let Some(entries) = record
        .as_ref()
        .and_then(|fields| fields.get(&request.map_field))
        .filter(|entries| !entries.is_null())
    {
        return leaves_from_map_field(&request.block, &request.map_field, entries);
    }

    let documents = store
        .list_children(&request.leaves)
        .with_context(|| format!("list {}", request.leaves))?;
    Ok(leaves_from_documents(&request.block, documents))
}

/// Fetches every requested block on its own thread and hands each result to
/// `on_result` on the calling thread as soon as it lands. A failing or
/// panicking block never stops the others.
pub fn fetch_blocks<S, F>(store: &S, requests: &[LeafFetchRequest], mut on_result: F)
where
    S: HierarchyStore + Sync + ?Sized,
    F: FnMut(BlockFetch),
{
    if requests.is_empty() {
        return;
    }

    thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let tx = tx.clone();
            handles.push(scope.spawn(move || {
                let result = fetch_block(store, request).map_err(|error| format!("{error:#}"));
                // The receiver outlives every worker inside the scope.
                let _ = tx.send(BlockFetch {
                    token: request.token,
                    block: request.block.clone(),
                    result,
                });
            }));
        }
        drop(tx);

        let mut reported = HashSet::new();
        for fetch in rx {
            reported.insert(fetch.token);
            on_result(fetch);
        }

        for (request, handle) in requests.iter().zip(handles) {
            if handle.join().is_err() && !reported.contains(&request.token) {
                log::error!(
                    "event=leaf_fetch module=session status=panic block={}",
                    request.block
                );
                on_result(BlockFetch {
                    token: request.token,
                    block: request.block.clone(),
                    result: Err(format!("fetch worker for block {} panicked", request.block)),
                });
            }
        }
    });
}
