use std::sync::OnceLock;

/// Side length of the tile the perceptual hash works on.
pub const N: usize = 32;

/// The 32x32 DCT-II basis matrix. Row 0 is `1/sqrt(N)`, row i is
/// `sqrt(2/N) * cos(pi/(2N) * i * (2j+1))`. Computed once per process.
fn basis() -> &'static [[f32; N]; N] {
    static BASIS: OnceLock<[[f32; N]; N]> = OnceLock::new();
    BASIS.get_or_init(|| {
        let n = N as f32;
        let mut m = [[0.0f32; N]; N];
        for j in 0..N {
            m[0][j] = 1.0 / n.sqrt();
        }
        let c = (2.0 / n).sqrt();
        for (i, row) in m.iter_mut().enumerate().skip(1) {
            for (j, cell) in row.iter_mut().enumerate() {
                let angle =
                    std::f32::consts::PI / (2.0 * n) * i as f32 * (2 * j + 1) as f32;
                *cell = c * angle.cos();
            }
        }
        m
    })
}

/// Computes `C * input * C^T` where `C` is the DCT basis. The input is a
/// row-major 32x32 matrix.
pub fn dct_2d(input: &[f32; N * N]) -> [f32; N * N] {
    let c = basis();

    // tmp = C * input
    let mut tmp = [0.0f32; N * N];
    for i in 0..N {
        for j in 0..N {
            let mut sum = 0.0;
            for k in 0..N {
                sum += c[i][k] * input[k * N + j];
            }
            tmp[i * N + j] = sum;
        }
    }

    // out = tmp * C^T
    let mut out = [0.0f32; N * N];
    for i in 0..N {
        for j in 0..N {
            let mut sum = 0.0;
            for k in 0..N {
                sum += tmp[i * N + k] * c[j][k];
            }
            out[i * N + j] = sum;
        }
    }
    out
}
