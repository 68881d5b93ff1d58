#[cfg(test)]
mod common;
#[cfg(test)]
mod vector_tests;
