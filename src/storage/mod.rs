// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Storage subsystem — global chunk pool + index + writer.

pub mod chunk_pool;
pub mod global_writer;
pub mod index;
