//! Byte-range access to file content.
//!
//! A file of `size` bytes always owns exactly `ceil(size / block_size)`
//! blocks, and the bytes of its last block past `size` are always zero. Every
//! operation here keeps that shape, which is what lets a gap left by a write
//! past the end, or by growing a file, read back as zeros.

use std::cmp::{max, min};

use crate::block::{BlockId, BlockStore};
use crate::error::{MemFsError, Pool, Result};
use crate::meta::Metadata;
use crate::node::{Chain, Node, NodeKind};

/// Number of blocks needed to hold `size` bytes.
pub fn blocks_for(size: u64, block_size: usize) -> u64 {
    let block_size = block_size as u64;
    size / block_size + if size % block_size == 0 { 0 } else { 1 }
}

fn file_parts(node: &mut Node) -> Result<(&mut Option<Chain>, &mut Metadata)> {
    let Node { kind, meta, .. } = node;
    match kind {
        NodeKind::File { blocks } => Ok((blocks, meta)),
        NodeKind::Directory { .. } => Err(MemFsError::IsADirectory),
    }
}

fn short_chain() -> MemFsError {
    MemFsError::fault("block chain ends before the file size".to_string())
}

/// Reads up to `len` bytes starting at `offset`. Reads past the end of the
/// file are clamped; a read at or beyond the end is empty.
pub fn read(store: &BlockStore, node: &Node, offset: u64, len: usize) -> Result<Vec<u8>> {
    let chain = match node.kind {
        NodeKind::File { blocks } => blocks,
        NodeKind::Directory { .. } => return Err(MemFsError::IsADirectory),
    };
    let size = node.meta.size;
    if offset >= size || len == 0 {
        return Ok(Vec::new());
    }
    let len = min(len as u64, size - offset) as usize;
    let block_size = store.block_size() as u64;

    let mut block = chain.ok_or_else(short_chain)?.head;
    for _ in 0..offset / block_size {
        block = store.next(block)?.ok_or_else(short_chain)?;
    }

    let mut in_block = (offset % block_size) as usize;
    let mut out = Vec::with_capacity(len);
    loop {
        let n = min(len - out.len(), block_size as usize - in_block);
        out.extend_from_slice(&store.data(block)?[in_block..in_block + n]);
        if out.len() == len {
            return Ok(out);
        }
        in_block = 0;
        block = store.next(block)?.ok_or_else(short_chain)?;
    }
}

/// Writes `buf` at `offset`, growing the file as needed, and returns the
/// number of bytes committed.
///
/// When the block pool runs out part way through, the bytes already copied
/// stay in place and the size grows to cover exactly them; the short count
/// tells the caller where the write stopped. A write that cannot commit a
/// single byte fails with [`MemFsError::Exhausted`] and leaves the file as it
/// was.
pub fn write(store: &mut BlockStore, node: &mut Node, offset: u64, buf: &[u8]) -> Result<usize> {
    let (chain, meta) = file_parts(node)?;
    if buf.is_empty() {
        return Ok(0);
    }
    offset.checked_add(buf.len() as u64).ok_or_else(|| {
        MemFsError::InvalidArgument(format!("write at offset {} overflows", offset))
    })?;

    let block_size = store.block_size();
    let old_blocks = blocks_for(meta.size, block_size);
    let mut written = 0;
    let outcome = copy_in(store, chain, old_blocks, offset, buf, &mut written);

    // Nothing committed means the gap blocks go too.
    let new_size = if written == 0 {
        meta.size
    } else {
        max(meta.size, offset + written as u64)
    };
    match outcome {
        Ok(()) => (),
        Err(MemFsError::Exhausted(Pool::Blocks)) => {
            // Blocks allocated past the committed bytes go back to the pool.
            trim(store, chain, blocks_for(new_size, block_size))?;
            if written == 0 {
                return Err(MemFsError::Exhausted(Pool::Blocks));
            }
            warn!(
                "short write: {} of {} bytes at offset {}",
                written,
                buf.len(),
                offset
            );
        }
        Err(err) => return Err(err),
    }

    meta.size = new_size;
    meta.touch_modified();
    Ok(written)
}

fn copy_in(
    store: &mut BlockStore,
    chain: &mut Option<Chain>,
    old_blocks: u64,
    offset: u64,
    buf: &[u8],
    written: &mut usize,
) -> Result<()> {
    let block_size = store.block_size();
    let start_index = offset / block_size as u64;

    // Writes that land in or past the last block start from the cached tail
    // instead of walking the whole chain.
    let existing = *chain;
    let (mut block, mut index) = match existing {
        None => {
            let head = store.allocate()?;
            *chain = Some(Chain { head, tail: head });
            (head, 0)
        }
        Some(current) if old_blocks == 0 => {
            return Err(MemFsError::fault(format!(
                "empty file owns block {}",
                current.head
            )))
        }
        Some(current) if start_index + 1 >= old_blocks => (current.tail, old_blocks - 1),
        Some(current) => (current.head, 0),
    };
    let chain = chain.as_mut().ok_or_else(short_chain)?;

    while index < start_index {
        block = advance(store, chain, block)?;
        index += 1;
    }

    let mut in_block = (offset % block_size as u64) as usize;
    loop {
        let n = min(buf.len() - *written, block_size - in_block);
        store.data_mut(block)?[in_block..in_block + n]
            .copy_from_slice(&buf[*written..*written + n]);
        *written += n;
        if *written == buf.len() {
            return Ok(());
        }
        in_block = 0;
        block = advance(store, chain, block)?;
    }
}

/// Steps to the block after `block`, appending a zeroed one at the end of
/// the chain.
fn advance(store: &mut BlockStore, chain: &mut Chain, block: BlockId) -> Result<BlockId> {
    if let Some(next) = store.next(block)? {
        return Ok(next);
    }
    let next = store.allocate()?;
    store.link(block, next)?;
    chain.tail = next;
    Ok(next)
}

/// Sets the file size, releasing blocks past the new end or appending zeroed
/// ones. Growing fails with [`MemFsError::Exhausted`] without changing the
/// file when the pool cannot cover the new size.
pub fn truncate(store: &mut BlockStore, node: &mut Node, new_size: u64) -> Result<()> {
    let (chain, meta) = file_parts(node)?;
    let block_size = store.block_size();
    let old_blocks = blocks_for(meta.size, block_size);
    let new_blocks = blocks_for(new_size, block_size);

    if new_blocks > old_blocks {
        let missing = new_blocks - old_blocks;
        if missing > store.free_count() as u64 {
            warn!("cannot grow file to {} bytes", new_size);
            return Err(MemFsError::Exhausted(Pool::Blocks));
        }
        if let Err(err) = extend(store, chain, missing) {
            trim(store, chain, old_blocks)?;
            return Err(err);
        }
    } else {
        trim(store, chain, new_blocks)?;
        let tail_len = (new_size % block_size as u64) as usize;
        if new_size < meta.size && tail_len != 0 {
            let tail = chain.ok_or_else(short_chain)?.tail;
            for byte in &mut store.data_mut(tail)?[tail_len..] {
                *byte = 0;
            }
        }
    }

    meta.size = new_size;
    meta.touch_modified();
    Ok(())
}

fn extend(store: &mut BlockStore, chain: &mut Option<Chain>, count: u64) -> Result<()> {
    for _ in 0..count {
        let block = store.allocate()?;
        if let Some(current) = chain.as_mut() {
            store.link(current.tail, block)?;
            current.tail = block;
        } else {
            *chain = Some(Chain { head: block, tail: block });
        }
    }
    Ok(())
}

/// Keeps the first `keep` blocks of the chain and frees the rest.
fn trim(store: &mut BlockStore, chain: &mut Option<Chain>, keep: u64) -> Result<()> {
    let current = match *chain {
        Some(current) => current,
        None => return Ok(()),
    };
    if keep == 0 {
        store.free_chain(current.head)?;
        *chain = None;
        return Ok(());
    }

    let mut block = current.head;
    for _ in 1..keep {
        block = store.next(block)?.ok_or_else(short_chain)?;
    }
    store.free_after(block)?;
    *chain = Some(Chain {
        head: current.head,
        tail: block,
    });
    Ok(())
}
