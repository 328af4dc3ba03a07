//! Reading and writing geospatial inputs and products

pub mod aoi;
pub mod dem;
pub mod raster;

pub use aoi::read_aoi;
pub use dem::{convert_wgs_to_utm, DemReader};
pub use raster::{
    image_center_wgs84, parse_acquisition_datetime, read_classified, read_image, write_classified,
    write_image,
};
