// gsched — Instruction scheduling for Gen selection listings
//
// Library root. The listing front-end (lexer, parser, resolve) builds
// kernels; deps/dag/schedule reorder their blocks before and after register
// allocation; verify, dot and timing inspect the result.

pub mod ast;
pub mod dag;
pub mod deps;
pub mod diag;
pub mod dot;
pub mod id;
pub mod isa;
pub mod latency;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod regalloc;
pub mod resolve;
pub mod schedule;
pub mod timing;
pub mod verify;
