//! Default pixel decoder backed by `rqrr`.

use super::{DecodeFault, DecodedResult, Location, PixelBuffer, PixelDecoder, Point};

/// Finds QR grids in a frame and returns the first one that decodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridDecoder;

impl GridDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl PixelDecoder for GridDecoder {
    fn decode(&self, frame: &PixelBuffer) -> Result<Option<DecodedResult>, DecodeFault> {
        frame.validate()?;

        let (width, height) = (frame.width as usize, frame.height as usize);
        let mut prepared =
            rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| frame.luma(x, y));

        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, content)) => {
                    let [tl, tr, br, bl] = grid.bounds;
                    return Ok(Some(DecodedResult {
                        data: content,
                        location: Some(Location {
                            top_left: Point { x: tl.x, y: tl.y },
                            top_right: Point { x: tr.x, y: tr.y },
                            bottom_right: Point { x: br.x, y: br.y },
                            bottom_left: Point { x: bl.x, y: bl.y },
                        }),
                    }));
                }
                Err(e) => tracing::trace!("Grid found but not decodable: {:?}", e),
            }
        }

        Ok(None)
    }
}
