//! rbprof_iseq
//!
//! Instruction sequence model for the rbprof type profiler.
//!
//! The front-end compiler hands over raw sequences ([`RawIseq`]): labels and
//! `[opcode, operands, line]` triples with untyped operands. [`normalize`]
//! turns one into a dense array of typed [`Insn`]s stored in an
//! [`IseqTable`], with labels resolved, entry markers inserted, the handler
//! table expanded per instruction, and branch idioms fused into narrowing
//! probes.
//!
//! # Example
//!
//! ```
//! use rbprof_iseq::{normalize, IseqTable, Op, RawIseq};
//!
//! let raw = RawIseq::from_json_str(r#"{
//!     "name": "<main>",
//!     "kind": "top",
//!     "body": [["putobject", [1], 1], ["leave", [], 1]]
//! }"#).unwrap();
//!
//! let mut table = IseqTable::new();
//! let id = normalize(&raw, &mut table).unwrap();
//! let iseq = table.get(id).unwrap();
//! assert_eq!(iseq.insns.len(), 2);
//! assert!(matches!(iseq.insns[1].op, Op::Leave));
//! ```

pub mod error;
pub mod fusion;
pub mod insn;
pub mod iseq;
pub mod normalize;
pub mod raw;

pub use error::{NormalizeError, NormalizeResult};
pub use insn::{
    BranchKind, BranchOp, CallInfo, Insn, Literal, LocalRef, Op, SpecialObject, ThrowKind,
};
pub use iseq::{ArgLayout, CatchEntry, CatchKind, Iseq, IseqId, IseqTable, KeywordDefault, KeywordParam};
pub use normalize::{decode_literal, normalize};
pub use raw::{IseqKind, RawArgs, RawCatchEntry, RawEntry, RawIseq, RawKeyword};
