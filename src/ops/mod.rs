pub mod brush;
pub mod placed_image;
pub mod puff;
pub mod shapes;
pub mod text;
