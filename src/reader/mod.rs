pub mod chunk_input;
