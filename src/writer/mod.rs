pub mod chunk_output;
