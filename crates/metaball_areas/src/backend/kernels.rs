//! Per-invocation kernel bodies shared by the software backends.
//!
//! Every kernel is written for a single invocation id `(x, y, z)` and guards its
//! own domain, so a scheduler may launch more invocations than texels. The
//! written resource is handed out in [`Rows`] bands so that bands can run on
//! separate threads; every invocation writes only its own element.

use super::{AreaCell, Kernel, ShaderGlobals};
use crate::emitters::PackedEmitter;
use crate::error::{PipelineError, Result};
use crate::gradient::sample_luminance;
use crate::settings::BorderMode;
use bevy::color::{ColorToComponents, LinearRgba};
use bevy::math::Vec2;

/// Signed distances stored for upscaling are clamped to this magnitude so that
/// bilinear weights of zero never meet an infinity.
const MAX_STORED_DISTANCE: f32 = 4.0;

/// Contact pairs are stored as `owner * PAIR_BASE + other`, exact in an `f32`.
pub(crate) const PAIR_BASE: u32 = 4096;

/// Field distance between the best and runner-up area under which a texel
/// lies on their contact line, in texel widths.
const CONTACT_TEXELS: f32 = 2.0;

/// 3x3 jump flooding stencil, self first.
const STENCIL: [(i32, i32); 9] = [
    (0, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Read-only view of an RGBA texture.
#[derive(Clone, Copy)]
pub(crate) struct TexView<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: &'a [[f32; 4]],
}

impl TexView<'_> {
    fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.texels[y * self.width as usize + x]
    }
}

/// Resources a kernel may read. Unbound slots are empty.
pub(crate) struct Inputs<'a> {
    pub globals: &'a ShaderGlobals,
    pub emitters: &'a [PackedEmitter],
    pub distances: &'a [f32],
    pub areas: &'a [AreaCell],
    pub colors: &'a [LinearRgba],
    pub gradient: &'a [u8],
    pub render_data: Option<TexView<'a>>,
}

/// The single resource a kernel writes.
pub(crate) enum Output<'a> {
    Distances(&'a mut [f32]),
    Areas(&'a mut [AreaCell]),
    Texture {
        width: u32,
        height: u32,
        texels: &'a mut [[f32; 4]],
    },
}

impl Output<'_> {
    /// Invocation extent covering every element written: `[x, y, layers]`.
    pub fn extent(&self, kernel: Kernel, globals: &ShaderGlobals) -> [u32; 3] {
        let n = globals.map_size;
        match self {
            Output::Distances(_) if kernel == Kernel::Clear => [n, n, globals.area_count],
            Output::Distances(_) | Output::Areas(_) => [n, n, 1],
            Output::Texture { width, height, .. } => [*width, *height, 1],
        }
    }

    /// Splits the output into bands of `rows` whole rows.
    pub fn bands(&mut self, globals: &ShaderGlobals, rows: u32) -> Vec<Rows<'_>> {
        let rows = rows.max(1);
        let n = globals.map_size;
        match self {
            Output::Distances(values) => {
                let layers = globals.area_count as usize;
                split(&mut values[..], n, n, layers, rows, |values| RowData::Distances {
                    layers,
                    values,
                })
            }
            Output::Areas(cells) => split(&mut cells[..], n, n, 1, rows, RowData::Areas),
            Output::Texture {
                width,
                height,
                texels,
            } => split(&mut texels[..], *width, *height, 1, rows, RowData::Texels),
        }
    }
}

fn split<'a, T>(
    data: &'a mut [T],
    width: u32,
    height: u32,
    per_texel: usize,
    rows: u32,
    wrap: impl Fn(&'a mut [T]) -> RowData<'a>,
) -> Vec<Rows<'a>> {
    let row_len = (width as usize * per_texel).max(1);
    data.chunks_mut(row_len * rows as usize)
        .enumerate()
        .map(|(i, chunk)| Rows {
            y0: i as u32 * rows,
            rows: (chunk.len() / row_len) as u32,
            width,
            height,
            data: wrap(chunk),
        })
        .collect()
}

/// A band of whole rows of the written resource.
pub(crate) struct Rows<'a> {
    y0: u32,
    rows: u32,
    width: u32,
    /// Rows of the whole resource.
    height: u32,
    data: RowData<'a>,
}

enum RowData<'a> {
    Distances { layers: usize, values: &'a mut [f32] },
    Areas(&'a mut [AreaCell]),
    Texels(&'a mut [[f32; 4]]),
}

impl Rows<'_> {
    /// Rows covered, as a range of `y`.
    pub fn span(&self) -> std::ops::Range<u32> {
        self.y0..self.y0 + self.rows
    }
}

fn mismatch(kernel: Kernel, slot: &'static str, expected: &'static str) -> PipelineError {
    PipelineError::BindingMismatch {
        kernel: kernel.entry_point(),
        slot,
        expected,
    }
}

fn expect_len(label: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(PipelineError::SizeMismatch {
            label,
            expected,
            found,
        })
    }
}

/// Checks resource kinds and sizes against the globals before any invocation runs,
/// so kernel bodies can index without bounds failures.
pub(crate) fn check(kernel: Kernel, inputs: &Inputs, out: &Output) -> Result<()> {
    let g = inputs.globals;
    let cells = g.map_size as usize * g.map_size as usize;
    let fields = cells * g.area_count as usize;
    match (kernel, out) {
        (Kernel::Clear | Kernel::AssignAreas, Output::Distances(d)) => {
            expect_len("_DistanceFields", fields, d.len())
        }
        (Kernel::Clear | Kernel::AssignAreas, _) => {
            Err(mismatch(kernel, "_DistanceFields", "a distance field buffer"))
        }
        (Kernel::Flatten, Output::Areas(a)) => {
            expect_len("_DistanceFields", fields, inputs.distances.len())?;
            expect_len("_AreasWrite", cells, a.len())
        }
        (Kernel::JumpFlooding, Output::Areas(a)) => {
            expect_len("_AreasRead", cells, inputs.areas.len())?;
            expect_len("_AreasWrite", cells, a.len())
        }
        (Kernel::Flatten | Kernel::JumpFlooding, _) => {
            Err(mismatch(kernel, "_AreasWrite", "an area buffer"))
        }
        (Kernel::Render | Kernel::RenderData, Output::Texture { width, height, .. }) => {
            expect_len("_AreasRead", cells, inputs.areas.len())?;
            expect_len("_Result", cells, *width as usize * *height as usize)?;
            if *width != g.map_size {
                return Err(PipelineError::SizeMismatch {
                    label: "_Result",
                    expected: g.map_size as usize,
                    found: *width as usize,
                });
            }
            if kernel == Kernel::Render {
                check_palette(inputs)?;
            }
            Ok(())
        }
        (Kernel::Render | Kernel::RenderData, _) => {
            Err(mismatch(kernel, "_Result", "an RGBA float texture"))
        }
        (Kernel::Upscale, Output::Texture { .. }) => {
            let Some(src) = inputs.render_data else {
                return Err(mismatch(kernel, "_RenderData", "an RGBA float texture"));
            };
            if src.width == 0 || src.height == 0 {
                return Err(PipelineError::SizeMismatch {
                    label: "_RenderData",
                    expected: 1,
                    found: 0,
                });
            }
            check_palette(inputs)
        }
        (Kernel::Upscale, _) => Err(mismatch(kernel, "_Target", "an RGBA float texture")),
    }
}

fn check_palette(inputs: &Inputs) -> Result<()> {
    let g = inputs.globals;
    if inputs.colors.len() < g.area_count as usize || g.area_count == 0 {
        return Err(PipelineError::SizeMismatch {
            label: "_AreaColors",
            expected: g.area_count.max(1) as usize,
            found: inputs.colors.len(),
        });
    }
    Ok(())
}

/// Runs one invocation of `kernel` against the band holding row `y`.
pub(crate) fn invoke(kernel: Kernel, inputs: &Inputs, band: &mut Rows, x: u32, y: u32, z: u32) {
    if x >= band.width || !band.span().contains(&y) {
        return;
    }
    let local = ((y - band.y0) * band.width + x) as usize;
    let (width, height) = (band.width, band.height);
    match (kernel, &mut band.data) {
        (Kernel::Clear, RowData::Distances { layers, values }) => {
            if (z as usize) < *layers {
                values[local * *layers + z as usize] = f32::INFINITY;
            }
        }
        (Kernel::AssignAreas, RowData::Distances { layers, values }) => {
            if z == 0 {
                assign_areas(inputs, &mut values[local * *layers..(local + 1) * *layers], x, y);
            }
        }
        (Kernel::Flatten, RowData::Areas(cells)) => cells[local] = flatten(inputs, x, y),
        (Kernel::JumpFlooding, RowData::Areas(cells)) => cells[local] = jump_flooding(inputs, x, y),
        (Kernel::Render, RowData::Texels(texels)) => texels[local] = render(inputs, x, y),
        (Kernel::RenderData, RowData::Texels(texels)) => texels[local] = render_data(inputs, x, y),
        (Kernel::Upscale, RowData::Texels(texels)) => {
            texels[local] = upscale(inputs, width, height, x, y)
        }
        // kinds are verified by `check` before any invocation
        _ => {}
    }
}

fn cell_index(g: &ShaderGlobals, x: u32, y: u32) -> usize {
    (y * g.map_size + x) as usize
}

/// Field-space position of a texel center; the field spans `[-1, 1]`.
pub(crate) fn field_position(g: &ShaderGlobals, x: u32, y: u32) -> Vec2 {
    let uv = (Vec2::new(x as f32, y as f32) + 0.5) * g.inv_map_size;
    Vec2::ONE - 2.0 * uv
}

/// Polynomial smooth minimum; `k <= 0` is the hard minimum.
pub(crate) fn smooth_min(a: f32, b: f32, k: f32) -> f32 {
    if k <= 0.0 {
        return a.min(b);
    }
    let h = (k - (a - b).abs()).max(0.0) / k;
    a.min(b) - h * h * k * 0.25
}

fn assign_areas(inputs: &Inputs, fields: &mut [f32], x: u32, y: u32) {
    let g = inputs.globals;
    let q = field_position(g, x, y);
    let k = g.smoothing * 0.01;
    let count = (g.emitter_count as usize).min(inputs.emitters.len());
    for e in &inputs.emitters[..count] {
        if e.area < 0 || e.area as usize >= fields.len() {
            continue;
        }
        let dist = q.distance(Vec2::new(e.position[0], e.position[1])) - e.radius;
        let slot = &mut fields[e.area as usize];
        *slot = smooth_min(*slot, dist, k);
    }
}

fn flatten(inputs: &Inputs, x: u32, y: u32) -> AreaCell {
    let g = inputs.globals;
    let areas = g.area_count as usize;
    let idx = cell_index(g, x, y);
    let fields = &inputs.distances[idx * areas..(idx + 1) * areas];
    let mut best = (f32::INFINITY, -1i32);
    let mut runner_up = (f32::INFINITY, -1i32);
    for (area, dist) in fields.iter().enumerate() {
        if *dist < best.0 {
            runner_up = best;
            best = (*dist, area as i32);
        } else if *dist < runner_up.0 {
            runner_up = (*dist, area as i32);
        }
    }
    let mut cell = AreaCell {
        distance: best.0,
        ..AreaCell::default()
    };
    if best.1 < 0 || best.0 > 0.0 {
        return cell;
    }
    let here = [x as f32, y as f32];
    cell.coords = here;
    cell.id = best.1;
    let contact_width = CONTACT_TEXELS * 2.0 * g.inv_map_size.x;
    if runner_up.1 >= 0 && runner_up.0 - best.0 <= contact_width {
        cell.edge_coords = here;
        cell.edge_owner = best.1;
        cell.edge_id = runner_up.1;
    }
    cell
}

/// One flood step: the nearest area seed and the nearest contact seed in the
/// stencil are tracked independently.
fn jump_flooding(inputs: &Inputs, x: u32, y: u32) -> AreaCell {
    let g = inputs.globals;
    let n = g.map_size as i64;
    let step = g.jump_flooding_step_size as i64;
    let mut out = inputs.areas[cell_index(g, x, y)];
    let p = Vec2::new(x as f32, y as f32);
    let mut nearest: Option<(f32, AreaCell)> = None;
    let mut contact: Option<(f32, AreaCell)> = None;
    for (dx, dy) in STENCIL {
        let nx = x as i64 + dx as i64 * step;
        let ny = y as i64 + dy as i64 * step;
        if nx < 0 || ny < 0 || nx >= n || ny >= n {
            continue;
        }
        let candidate = inputs.areas[(ny * n + nx) as usize];
        if candidate.has_seed() {
            let d = p.distance_squared(Vec2::from(candidate.coords));
            if nearest.is_none_or(|(bd, _)| d < bd) {
                nearest = Some((d, candidate));
            }
        }
        if candidate.has_contact() {
            let d = p.distance_squared(Vec2::from(candidate.edge_coords));
            if contact.is_none_or(|(bd, _)| d < bd) {
                contact = Some((d, candidate));
            }
        }
    }
    if let Some((_, seed)) = nearest {
        out.coords = seed.coords;
        out.id = seed.id;
    }
    if let Some((_, seed)) = contact {
        out.edge_coords = seed.edge_coords;
        out.edge_owner = seed.edge_owner;
        out.edge_id = seed.edge_id;
    }
    out
}

fn texel_distance(g: &ShaderGlobals, x: u32, y: u32, coords: [f32; 2]) -> f32 {
    Vec2::new(x as f32, y as f32).distance(Vec2::from(coords)) * 2.0 * g.inv_map_size.x
}

/// Distance from a texel to its nearest seed in field units.
fn seed_distance(g: &ShaderGlobals, cell: &AreaCell, x: u32, y: u32) -> f32 {
    if !cell.has_seed() {
        return f32::INFINITY;
    }
    texel_distance(g, x, y, cell.coords)
}

/// Nearest place where two areas meet.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Contact {
    /// Field units from the texel.
    distance: f32,
    pair: (u32, u32),
}

impl Contact {
    fn of(g: &ShaderGlobals, cell: &AreaCell, x: u32, y: u32) -> Option<Contact> {
        cell.has_contact().then(|| Contact {
            distance: texel_distance(g, x, y, cell.edge_coords),
            pair: (cell.edge_owner as u32, cell.edge_id as u32),
        })
    }

    fn code(&self) -> f32 {
        (self.pair.0 * PAIR_BASE + self.pair.1) as f32
    }

    fn decode(code: f32, distance: f32) -> Option<Contact> {
        (code >= 0.0).then(|| {
            let code = code.round() as u32;
            Contact {
                distance,
                pair: (code / PAIR_BASE, code % PAIR_BASE),
            }
        })
    }
}

/// What the render stages know about one texel.
#[derive(Clone, Copy, Debug)]
struct Texel {
    owner: Option<u32>,
    inside: bool,
    /// Field distance outside the owning blob, zero inside.
    outside_distance: f32,
    contact: Option<Contact>,
}

fn palette(inputs: &Inputs, id: u32) -> LinearRgba {
    inputs
        .colors
        .get(id as usize)
        .copied()
        .unwrap_or(LinearRgba::NONE)
}

fn mix(a: LinearRgba, b: LinearRgba, t: f32) -> LinearRgba {
    LinearRgba {
        red: a.red + (b.red - a.red) * t,
        green: a.green + (b.green - a.green) * t,
        blue: a.blue + (b.blue - a.blue) * t,
        alpha: a.alpha + (b.alpha - a.alpha) * t,
    }
}

/// `border` over `base` faded by the opacity lookup, `base` past the band.
fn band(inputs: &Inputs, base: LinearRgba, border: LinearRgba, distance: f32) -> LinearRgba {
    let t = distance / inputs.globals.border_power.max(f32::EPSILON);
    if !(0.0..1.0).contains(&t) {
        return base;
    }
    mix(base, border, sample_luminance(inputs.gradient, t))
}

/// Composites one texel.
///
/// Outside every blob the band fades from the owner towards the background.
/// Inside, a band straddles each line where two areas meet: the border color
/// when grouping, the pair's blended color when splitting.
fn shade(inputs: &Inputs, texel: &Texel) -> [f32; 4] {
    let g = inputs.globals;
    let background = palette(inputs, g.background_area);
    let Some(id) = texel.owner else {
        return background.to_f32_array();
    };
    let area_color = palette(inputs, id);
    let color = match (g.border_mode, texel.inside, texel.contact) {
        (BorderMode::NoBorders, true, _) | (_, true, None) => area_color,
        (BorderMode::NoBorders, false, _) => background,
        (BorderMode::GroupAllAreas, true, Some(contact)) => {
            band(inputs, area_color, g.border_color, contact.distance)
        }
        (BorderMode::SplitAreas, true, Some(contact)) => {
            let (a, b) = contact.pair;
            let pair = mix(palette(inputs, a), palette(inputs, b), 0.5);
            band(inputs, area_color, pair, contact.distance)
        }
        (BorderMode::GroupAllAreas, false, _) => {
            band(inputs, background, g.border_color, texel.outside_distance)
        }
        (BorderMode::SplitAreas, false, _) => {
            band(inputs, background, area_color, texel.outside_distance)
        }
    };
    color.to_f32_array()
}

fn render(inputs: &Inputs, x: u32, y: u32) -> [f32; 4] {
    let g = inputs.globals;
    let cell = inputs.areas[cell_index(g, x, y)];
    shade(
        inputs,
        &Texel {
            owner: cell.has_seed().then_some(cell.id as u32),
            inside: cell.has_seed() && cell.distance <= 0.0,
            outside_distance: seed_distance(g, &cell, x, y),
            contact: Contact::of(g, &cell, x, y),
        },
    )
}

/// `(id, signed distance, contact distance, contact pair)` per texel for the
/// upscale pass. A missing contact is stored as pair -1.
fn render_data(inputs: &Inputs, x: u32, y: u32) -> [f32; 4] {
    let g = inputs.globals;
    let cell = inputs.areas[cell_index(g, x, y)];
    let signed = if cell.has_seed() && cell.distance > 0.0 {
        seed_distance(g, &cell, x, y)
    } else {
        cell.distance
    };
    let contact = Contact::of(g, &cell, x, y);
    [
        cell.id as f32,
        signed.clamp(-MAX_STORED_DISTANCE, MAX_STORED_DISTANCE),
        contact.map_or(MAX_STORED_DISTANCE, |c| c.distance.min(MAX_STORED_DISTANCE)),
        contact.map_or(-1.0, |c| c.code()),
    ]
}

fn upscale(inputs: &Inputs, width: u32, height: u32, x: u32, y: u32) -> [f32; 4] {
    let Some(src) = inputs.render_data else {
        return [0.0; 4];
    };
    let sx = (x as f32 + 0.5) / width as f32 * src.width as f32 - 0.5;
    let sy = (y as f32 + 0.5) / height as f32 * src.height as f32 - 0.5;
    let (fx0, fy0) = (sx.floor(), sy.floor());
    let (fx, fy) = (sx - fx0, sy - fy0);
    let (x0, y0) = (fx0 as i64, fy0 as i64);
    let taps = [
        (src.fetch(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (src.fetch(x0 + 1, y0), fx * (1.0 - fy)),
        (src.fetch(x0, y0 + 1), (1.0 - fx) * fy),
        (src.fetch(x0 + 1, y0 + 1), fx * fy),
    ];
    let signed: f32 = taps.iter().map(|(t, w)| t[1] * w).sum();
    let contact_distance: f32 = taps.iter().map(|(t, w)| t[2] * w).sum();
    let owner = taps
        .iter()
        .filter(|(t, _)| t[0] >= 0.0)
        .min_by(|(a, _), (b, _)| a[1].total_cmp(&b[1]))
        .map(|(t, _)| t[0].round() as u32);
    let contact = taps
        .iter()
        .filter(|(t, _)| t[3] >= 0.0)
        .min_by(|(a, _), (b, _)| a[2].total_cmp(&b[2]))
        .and_then(|(t, _)| Contact::decode(t[3], contact_distance));
    shade(
        inputs,
        &Texel {
            owner,
            inside: owner.is_some() && signed <= 0.0,
            outside_distance: signed.max(0.0),
            contact,
        },
    )
}
