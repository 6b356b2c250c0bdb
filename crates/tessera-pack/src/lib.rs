//! Packfile format for Tessera.
//!
//! Reads and writes git's version-2 packfiles: zlib-compressed entries,
//! offset and reference deltas, and a trailing SHA-1 over the whole pack.
//!
//! # Architecture
//!
//! - **Scanner**: sequential decoder yielding one record per entry
//! - **Delta codec**: applies and produces git delta instruction streams
//! - **Ingester**: resolves records into whole objects, parking deltas whose
//!   base has not arrived yet
//! - **PackIndex**: fan-out table + sorted IDs for O(log n) lookups, in the
//!   `.idx` v2 layout
//! - **PackFileReader**: random-access reads through an index
//! - **PackWriter**: builds packs from objects, optionally deltified

pub mod delta;
pub mod entry;
pub mod error;
pub mod index;
pub mod ingest;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use delta::{apply_delta, encode_delta};
pub use entry::{PackRecord, RecordKind};
pub use error::{PackError, PackResult};
pub use index::PackIndex;
pub use ingest::{ingest_packfile, IngestReport, IngestSink, IngestedEntry, Ingester, StoreSink};
pub use reader::{BaseResolver, NoExternalBases, PackFileReader};
pub use scanner::{verify_trailer, PackHeader, Scanner, PACK_HEADER_LEN};
pub use writer::PackWriter;
