// Tabular data: permissive CSV reading, Parquet I/O and the column kernels
// the stages use.

pub mod codec;
pub mod csv_reader;
pub mod parquet_io;
pub mod transform;

pub use codec::Codec;
pub use csv_reader::{read_delimited, read_delimited_from, CsvReadReport};
pub use parquet_io::{preview, read_parquet, write_parquet, WrittenFile};
pub use transform::{filter_not_null, group_count_top_n};
