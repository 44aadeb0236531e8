use arrayvec::ArrayVec;
use stereo_core::{
    nalgebra::{Matrix3, SMatrix, SVector, Vector4},
    sample_consensus::Estimator,
    FeatureMatch,
};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint};

// Monomials of degree three, eliminated by the Gauss-Jordan step.
const BASIS_XXX: usize = 0;
const BASIS_XXY: usize = 1;
const BASIS_XXZ: usize = 2;
const BASIS_XYY: usize = 3;
const BASIS_XYZ: usize = 4;
const BASIS_XZZ: usize = 5;
const BASIS_YYY: usize = 6;
const BASIS_YYZ: usize = 7;
const BASIS_YZZ: usize = 8;
const BASIS_ZZZ: usize = 9;
// Monomials of degree two or less, the basis of the quotient ring.
const BASIS_XX: usize = 10;
const BASIS_XY: usize = 11;
const BASIS_XZ: usize = 12;
const BASIS_YY: usize = 13;
const BASIS_YZ: usize = 14;
const BASIS_ZZ: usize = 15;
const BASIS_X: usize = 16;
const BASIS_Y: usize = 17;
const BASIS_Z: usize = 18;
const BASIS_1: usize = 19;

/// Relative tolerance on the imaginary part of an eigenvalue of the action matrix
/// below which the root is treated as real.
const IMAGINARY_THRESHOLD: f64 = 1e-8;
/// Smallest accepted magnitude of the constant monomial in a solution eigenvector.
const HOMOGENEOUS_THRESHOLD: f64 = 1e-12;

type PolyBasisVec = SVector<f64, 20>;
type NullspaceMat = SMatrix<f64, 9, 4>;
type ConstraintMat = SMatrix<f64, 10, 20>;
type Square10 = SMatrix<f64, 10, 10>;

/// A linear polynomial `x * a.x + y * a.y + z * a.z + a.w`.
type LinearPoly = Vector4<f64>;

/// Encodes the epipolar constraint `transpose(b) * E * a = 0` of each match as a row
/// acting on `E` flattened in row-major order.
fn encode_epipolar_equation(matches: &[FeatureMatch<NormalizedKeyPoint>; 5]) -> SMatrix<f64, 9, 9> {
    // The four extra rows stay zero so that the SVD yields a full set of right singular vectors.
    let mut out = SMatrix::<f64, 9, 9>::zeros();
    for (i, FeatureMatch(a, b)) in matches.iter().enumerate() {
        let ap = a.homogeneous();
        let bp = b.homogeneous();
        for r in 0..3 {
            for c in 0..3 {
                out[(i, 3 * r + c)] = bp[r] * ap[c];
            }
        }
    }
    out
}

/// The four dimensional right null space of the five epipolar constraints.
///
/// Column `k` is the matrix `E_k` in row-major order, so every essential matrix
/// consistent with the matches is `x E_1 + y E_2 + z E_3 + E_4` for some `x`, `y`, `z`.
fn nullspace_basis(
    matches: &[FeatureMatch<NormalizedKeyPoint>; 5],
    epsilon: f64,
    iterations: usize,
) -> Option<NullspaceMat> {
    let svd = encode_epipolar_equation(matches).try_svd(false, true, epsilon, iterations)?;
    let v_t = svd.v_t?;
    let mut sources = [0, 1, 2, 3, 4, 5, 6, 7, 8];
    sources.sort_unstable_by_key(|&ix| float_ord::FloatOrd(svd.singular_values[ix]));
    let mut nullspace = NullspaceMat::zeros();
    for (&ix, mut column) in sources.iter().zip(nullspace.column_iter_mut()) {
        column.copy_from(&v_t.row(ix).transpose());
    }
    Some(nullspace)
}

/// Product of two linear polynomials.
fn mul_linear(a: LinearPoly, b: LinearPoly) -> PolyBasisVec {
    let mut res = PolyBasisVec::zeros();
    res[BASIS_XX] = a.x * b.x;
    res[BASIS_XY] = a.x * b.y + a.y * b.x;
    res[BASIS_XZ] = a.x * b.z + a.z * b.x;
    res[BASIS_YY] = a.y * b.y;
    res[BASIS_YZ] = a.y * b.z + a.z * b.y;
    res[BASIS_ZZ] = a.z * b.z;
    res[BASIS_X] = a.x * b.w + a.w * b.x;
    res[BASIS_Y] = a.y * b.w + a.w * b.y;
    res[BASIS_Z] = a.z * b.w + a.w * b.z;
    res[BASIS_1] = a.w * b.w;
    res
}

/// Product of a polynomial of degree at most two with a linear polynomial.
fn mul_quadratic(a: PolyBasisVec, b: LinearPoly) -> PolyBasisVec {
    let mut res = PolyBasisVec::zeros();
    res[BASIS_XXX] = a[BASIS_XX] * b.x;
    res[BASIS_XXY] = a[BASIS_XX] * b.y + a[BASIS_XY] * b.x;
    res[BASIS_XXZ] = a[BASIS_XX] * b.z + a[BASIS_XZ] * b.x;
    res[BASIS_XYY] = a[BASIS_XY] * b.y + a[BASIS_YY] * b.x;
    res[BASIS_XYZ] = a[BASIS_XY] * b.z + a[BASIS_YZ] * b.x + a[BASIS_XZ] * b.y;
    res[BASIS_XZZ] = a[BASIS_XZ] * b.z + a[BASIS_ZZ] * b.x;
    res[BASIS_YYY] = a[BASIS_YY] * b.y;
    res[BASIS_YYZ] = a[BASIS_YY] * b.z + a[BASIS_YZ] * b.y;
    res[BASIS_YZZ] = a[BASIS_YZ] * b.z + a[BASIS_ZZ] * b.y;
    res[BASIS_ZZZ] = a[BASIS_ZZ] * b.z;
    res[BASIS_XX] = a[BASIS_XX] * b.w + a[BASIS_X] * b.x;
    res[BASIS_XY] = a[BASIS_XY] * b.w + a[BASIS_X] * b.y + a[BASIS_Y] * b.x;
    res[BASIS_XZ] = a[BASIS_XZ] * b.w + a[BASIS_X] * b.z + a[BASIS_Z] * b.x;
    res[BASIS_YY] = a[BASIS_YY] * b.w + a[BASIS_Y] * b.y;
    res[BASIS_YZ] = a[BASIS_YZ] * b.w + a[BASIS_Y] * b.z + a[BASIS_Z] * b.y;
    res[BASIS_ZZ] = a[BASIS_ZZ] * b.w + a[BASIS_Z] * b.z;
    res[BASIS_X] = a[BASIS_X] * b.w + a[BASIS_1] * b.x;
    res[BASIS_Y] = a[BASIS_Y] * b.w + a[BASIS_1] * b.y;
    res[BASIS_Z] = a[BASIS_Z] * b.w + a[BASIS_1] * b.z;
    res[BASIS_1] = a[BASIS_1] * b.w;
    res
}

/// Expands the ten cubic constraints on `(x, y, z)`: the determinant constraint
/// `det(E) = 0` and the nine entries of the trace constraint
/// `E * transpose(E) * E - 0.5 * trace(E * transpose(E)) * E = 0`.
fn polynomial_constraints(nullspace: &NullspaceMat) -> ConstraintMat {
    let mut e_poly = [[LinearPoly::zeros(); 3]; 3];
    for (i, row) in e_poly.iter_mut().enumerate() {
        for (j, entry) in row.iter_mut().enumerate() {
            *entry = nullspace.row(3 * i + j).transpose();
        }
    }

    let mut m = ConstraintMat::zeros();
    // Cofactor expansion along the last row.
    let det = mul_quadratic(
        mul_linear(e_poly[0][1], e_poly[1][2]) - mul_linear(e_poly[0][2], e_poly[1][1]),
        e_poly[2][0],
    ) + mul_quadratic(
        mul_linear(e_poly[0][2], e_poly[1][0]) - mul_linear(e_poly[0][0], e_poly[1][2]),
        e_poly[2][1],
    ) + mul_quadratic(
        mul_linear(e_poly[0][0], e_poly[1][1]) - mul_linear(e_poly[0][1], e_poly[1][0]),
        e_poly[2][2],
    );
    m.row_mut(0).copy_from(&det.transpose());

    let mut eet = [[PolyBasisVec::zeros(); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            eet[i][j] = if i <= j {
                (0..3)
                    .map(|k| mul_linear(e_poly[i][k], e_poly[j][k]))
                    .fold(PolyBasisVec::zeros(), |sum, p| sum + p)
            } else {
                eet[j][i]
            };
        }
    }

    let mut l = eet;
    let half_trace = 0.5 * (eet[0][0] + eet[1][1] + eet[2][2]);
    for (i, row) in l.iter_mut().enumerate() {
        row[i] -= half_trace;
    }

    for i in 0..3 {
        for j in 0..3 {
            let lij = (0..3)
                .map(|k| mul_quadratic(l[i][k], e_poly[k][j]))
                .fold(PolyBasisVec::zeros(), |sum, p| sum + p);
            m.row_mut(1 + 3 * i + j).copy_from(&lij.transpose());
        }
    }

    m
}

/// Builds the action matrix of multiplication by `x` on the monomial vector
/// `[xx, xy, xz, yy, yz, zz, x, y, z, 1]`.
///
/// The constraints are reduced so that each cubic monomial is a linear combination of
/// that vector. Every solution then makes the monomial vector a right eigenvector of
/// the action matrix with eigenvalue `x`.
fn action_matrix(constraints: &ConstraintMat) -> Option<Square10> {
    let cubic = constraints.fixed_columns::<10>(0).into_owned();
    let rest = constraints.fixed_columns::<10>(10).into_owned();
    let reduced = cubic.full_piv_lu().solve(&rest)?;

    let mut action = Square10::zeros();
    // x * {xx, xy, xz, yy, yz, zz} = {xxx, xxy, xxz, xyy, xyz, xzz}
    for k in 0..6 {
        action.row_mut(k).copy_from(&(-reduced.row(k)));
    }
    // x * {x, y, z, 1} = {xx, xy, xz, x}
    action[(6, BASIS_XX - 10)] = 1.0;
    action[(7, BASIS_XY - 10)] = 1.0;
    action[(8, BASIS_XZ - 10)] = 1.0;
    action[(9, BASIS_X - 10)] = 1.0;
    Some(action)
}

/// Implements the five-point algorithm from the paper "Recent developments on direct relative
/// orientation" by Stewenius, Engels and Nister.
///
/// It returns up to ten essential matrices which are consistent with five matches. The
/// ambiguity has to be resolved with additional matches, which sample consensus does.
#[derive(Copy, Clone, Debug)]
pub struct NisterStewenius {
    pub epsilon: f64,
    pub iterations: usize,
}

impl NisterStewenius {
    pub fn new() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }

    /// All real solutions for exactly five matches, normalized to unit frobenius norm.
    pub fn from_matches(
        &self,
        matches: &[FeatureMatch<NormalizedKeyPoint>; 5],
    ) -> ArrayVec<EssentialMatrix, 10> {
        let mut solutions = ArrayVec::new();
        let basis = match nullspace_basis(matches, self.epsilon, self.iterations) {
            Some(basis) => basis,
            None => return solutions,
        };
        let action = match action_matrix(&polynomial_constraints(&basis)) {
            Some(action) if action.iter().all(|n| n.is_finite()) => action,
            _ => return solutions,
        };
        let eigenvalues = match action.try_schur(f64::EPSILON, self.iterations) {
            Some(schur) => schur.complex_eigenvalues(),
            None => return solutions,
        };
        for eigenvalue in eigenvalues.iter() {
            if eigenvalue.im.abs() > IMAGINARY_THRESHOLD * (1.0 + eigenvalue.re.abs()) {
                continue;
            }
            let essential = self
                .monomials_for_root(&action, eigenvalue.re)
                .and_then(|monomials| {
                    let w = monomials[BASIS_1 - 10];
                    if w.abs() < HOMOGENEOUS_THRESHOLD {
                        return None;
                    }
                    let coefficients = Vector4::new(
                        monomials[BASIS_X - 10] / w,
                        monomials[BASIS_Y - 10] / w,
                        monomials[BASIS_Z - 10] / w,
                        1.0,
                    );
                    let flat = basis * coefficients;
                    EssentialMatrix(Matrix3::from_row_slice(flat.as_slice())).normalize()
                });
            if let Some(essential) = essential {
                if solutions.is_full() {
                    break;
                }
                solutions.push(essential);
            }
        }
        solutions
    }

    /// The eigenvector of the action matrix for a real eigenvalue, which is the
    /// right singular vector of `action - lambda * I` with the smallest singular value.
    fn monomials_for_root(&self, action: &Square10, lambda: f64) -> Option<SVector<f64, 10>> {
        let svd = (action - Square10::from_diagonal_element(lambda)).try_svd(
            false,
            true,
            self.epsilon,
            self.iterations,
        )?;
        let ix = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| ix)?;
        Some(svd.v_t?.row(ix).transpose())
    }
}

impl Default for NisterStewenius {
    fn default() -> Self {
        Self::new()
    }
}

impl Estimator<FeatureMatch<NormalizedKeyPoint>> for NisterStewenius {
    type Model = EssentialMatrix;
    type ModelIter = ArrayVec<EssentialMatrix, 10>;
    const MIN_SAMPLES: usize = 5;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        let matches: ArrayVec<FeatureMatch<NormalizedKeyPoint>, 5> =
            data.take(5).collect();
        match matches.into_inner() {
            Ok(matches) => self.from_matches(&matches),
            Err(_) => ArrayVec::new(),
        }
    }
}
