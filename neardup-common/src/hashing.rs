pub mod dct;
pub mod hamming;
pub mod phash;
