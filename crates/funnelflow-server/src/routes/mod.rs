pub mod funnels;
pub mod health;
pub mod track;
pub mod websites;
