use image::GrayImage;

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into a `grid x grid` tile layout; each tile gets a
/// clipped-histogram equalization LUT and every pixel is bilinearly
/// interpolated between the LUTs of the four nearest tile centres.
pub(crate) struct Clahe {
    grid: u32,
    clip_limit: f64,
}

impl Clahe {
    pub(crate) fn new(grid: u32, clip_limit: f64) -> Self {
        Self {
            grid: grid.max(1),
            clip_limit,
        }
    }

    pub(crate) fn apply(&self, src: &GrayImage) -> GrayImage {
        let (w, h) = src.dimensions();
        if w == 0 || h == 0 {
            return src.clone();
        }

        let tile_w = w.div_ceil(self.grid);
        let tile_h = h.div_ceil(self.grid);
        let tiles_x = w.div_ceil(tile_w);
        let tiles_y = h.div_ceil(tile_h);

        let mut luts = Vec::with_capacity((tiles_x * tiles_y) as usize);
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let x0 = tx * tile_w;
                let y0 = ty * tile_h;
                let x1 = (x0 + tile_w).min(w);
                let y1 = (y0 + tile_h).min(h);
                luts.push(self.tile_lut(src, x0, y0, x1, y1));
            }
        }
        let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

        let mut out = GrayImage::new(w, h);
        for y in 0..h {
            let (ty1, ty2, ya) = neighbours(y, tile_h, tiles_y);
            for x in 0..w {
                let (tx1, tx2, xa) = neighbours(x, tile_w, tiles_x);
                let v = src.get_pixel(x, y)[0] as usize;

                let top = lut_at(tx1, ty1)[v] as f32 * (1.0 - xa) + lut_at(tx2, ty1)[v] as f32 * xa;
                let bottom =
                    lut_at(tx1, ty2)[v] as f32 * (1.0 - xa) + lut_at(tx2, ty2)[v] as f32 * xa;
                let value = top * (1.0 - ya) + bottom * ya;
                out.put_pixel(x, y, image::Luma([value.round().clamp(0.0, 255.0) as u8]));
            }
        }
        out
    }

    fn tile_lut(&self, src: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) -> [u8; 256] {
        let mut hist = [0u32; 256];
        for y in y0..y1 {
            for x in x0..x1 {
                hist[src.get_pixel(x, y)[0] as usize] += 1;
            }
        }
        let area = (x1 - x0) * (y1 - y0);

        if self.clip_limit > 0.0 {
            let clip = ((self.clip_limit * area as f64 / 256.0) as u32).max(1);
            clip_histogram(&mut hist, clip);
        }

        let scale = 255.0 / area as f32;
        let mut lut = [0u8; 256];
        let mut sum = 0u32;
        for (bin, out) in hist.iter().zip(lut.iter_mut()) {
            sum += bin;
            *out = (sum as f32 * scale).round().clamp(0.0, 255.0) as u8;
        }
        lut
    }
}

/// Clips every bin at `clip` and spreads the excess evenly, handing the
/// remainder out one count per stride.
fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        let mut i = 0;
        while i < 256 && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

/// Tile indices either side of a pixel's position relative to the tile
/// centres, and the interpolation weight toward the second one.
fn neighbours(pos: u32, tile: u32, tiles: u32) -> (u32, u32, f32) {
    let t = (pos as f32 + 0.5) / tile as f32 - 0.5;
    let t1 = t.floor();
    let a = t - t1;
    let last = tiles as i64 - 1;
    let i1 = (t1 as i64).clamp(0, last) as u32;
    let i2 = (t1 as i64 + 1).clamp(0, last) as u32;
    (i1, i2, a)
}
