pub mod playlist;
pub mod queue;
pub mod track;
