// lib.rs
pub mod convert;
pub mod entry;
pub mod error;
pub mod flatfile;
pub mod gff3;
pub mod location;
pub mod mapper;
pub mod ontology;
pub mod seqindex;
pub mod trans_index;
pub mod validate;
