pub mod parser;
pub mod scanner;
pub mod tagger;
