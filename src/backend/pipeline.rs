// Shader modules, pipeline layouts and pipelines
//
// Fixed-function state is described with small builder structs that are
// turned into Vulkan create-infos only at pipeline creation time.

use super::descriptor::DescriptorSetLayout;
use super::render_pass::RenderPass;
use super::Device;
use anyhow::{Context, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::io::Cursor;
use std::sync::Arc;

const DEFAULT_ENTRY_POINT: &CStr = c"main";

pub struct ShaderModule {
    pub handle: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    pub entry_point: CString,
    device: Arc<Device>,
}

impl ShaderModule {
    /// Create a module from pre-compiled SPIR-V bytes
    pub fn new(device: &Arc<Device>, stage: vk::ShaderStageFlags, spirv: &[u8]) -> Result<Arc<Self>> {
        // read_spv handles alignment and endianness for us
        let code = ash::util::read_spv(&mut Cursor::new(spirv)).context("Invalid SPIR-V")?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let handle = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Arc::new(Self {
            handle,
            stage,
            entry_point: DEFAULT_ENTRY_POINT.to_owned(),
            device: device.clone(),
        }))
    }

    /// Load SPIR-V from disk
    pub fn from_file(
        device: &Arc<Device>,
        stage: vk::ShaderStageFlags,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read shader: {:?}", path))?;
        Self::new(device, stage, &bytes)
    }

    fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.handle)
            .name(&self.entry_point)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.handle, None) };
    }
}

#[derive(Clone, Default)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<Arc<DescriptorSetLayout>>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl PipelineLayoutDesc {
    pub fn descriptor_set_layout(mut self, layout: Arc<DescriptorSetLayout>) -> Self {
        self.set_layouts.push(layout);
        self
    }

    pub fn push_constant_range(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size,
        });
        self
    }
}

pub struct PipelineLayout {
    pub handle: vk::PipelineLayout,
    _set_layouts: Vec<Arc<DescriptorSetLayout>>,
    device: Arc<Device>,
}

impl PipelineLayout {
    pub fn new(device: &Arc<Device>, desc: PipelineLayoutDesc) -> Result<Arc<Self>> {
        check_push_constants(
            &desc.push_constant_ranges,
            device.properties.limits.max_push_constants_size,
        )?;

        let set_layouts: Vec<vk::DescriptorSetLayout> =
            desc.set_layouts.iter().map(|l| l.handle).collect();
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);

        let handle = unsafe { device.device.create_pipeline_layout(&create_info, None) }
            .context("Failed to create pipeline layout")?;

        Ok(Arc::new(Self {
            handle,
            _set_layouts: desc.set_layouts,
            device: device.clone(),
        }))
    }
}

/// Every range must end within `limit` bytes
fn check_push_constants(ranges: &[vk::PushConstantRange], limit: u32) -> Result<()> {
    for range in ranges {
        if range.offset.checked_add(range.size).map_or(true, |end| end > limit) {
            anyhow::bail!(
                "Push constant range at offset {} ({} bytes) exceeds device limit of {} bytes",
                range.offset,
                range.size,
                limit
            );
        }
    }
    Ok(())
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_pipeline_layout(self.handle, None) };
    }
}

#[derive(Debug, Clone, Default)]
pub struct VertexInputStateDesc {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputStateDesc {
    pub fn binding(mut self, binding: u32, stride: u32, input_rate: vk::VertexInputRate) -> Self {
        self.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride,
            input_rate,
        });
        self
    }

    pub fn attribute(mut self, location: u32, binding: u32, format: vk::Format, offset: u32) -> Self {
        self.attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding,
            format,
            offset,
        });
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InputAssemblyStateDesc {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
}

impl Default for InputAssemblyStateDesc {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
        }
    }
}

impl InputAssemblyStateDesc {
    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn primitive_restart(mut self, enable: bool) -> Self {
        self.primitive_restart = enable;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationStateDesc {
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: Option<(f32, f32, f32)>,
    pub line_width: f32,
}

impl Default for RasterizationStateDesc {
    fn default() -> Self {
        Self {
            depth_clamp: false,
            rasterizer_discard: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_bias: None,
            line_width: 1.0,
        }
    }
}

impl RasterizationStateDesc {
    pub fn depth_clamp(mut self, enable: bool) -> Self {
        self.depth_clamp = enable;
        self
    }

    pub fn rasterizer_discard(mut self, enable: bool) -> Self {
        self.rasterizer_discard = enable;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    /// (constant factor, clamp, slope factor)
    pub fn depth_bias(mut self, constant: f32, clamp: f32, slope: f32) -> Self {
        self.depth_bias = Some((constant, clamp, slope));
        self
    }

    pub fn line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MultisampleStateDesc {
    pub samples: vk::SampleCountFlags,
    pub min_sample_shading: Option<f32>,
    pub alpha_to_coverage: bool,
    pub alpha_to_one: bool,
}

impl Default for MultisampleStateDesc {
    fn default() -> Self {
        Self {
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            alpha_to_coverage: false,
            alpha_to_one: false,
        }
    }
}

impl MultisampleStateDesc {
    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn sample_shading(mut self, min_sample_shading: f32) -> Self {
        self.min_sample_shading = Some(min_sample_shading);
        self
    }

    pub fn alpha_to_coverage(mut self, enable: bool) -> Self {
        self.alpha_to_coverage = enable;
        self
    }

    pub fn alpha_to_one(mut self, enable: bool) -> Self {
        self.alpha_to_one = enable;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilStateDesc {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare_op: vk::CompareOp,
    pub depth_bounds: Option<(f32, f32)>,
    pub stencil: Option<(vk::StencilOpState, vk::StencilOpState)>,
}

impl Default for DepthStencilStateDesc {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            compare_op: vk::CompareOp::LESS,
            depth_bounds: None,
            stencil: None,
        }
    }
}

impl DepthStencilStateDesc {
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            ..Default::default()
        }
    }

    pub fn depth_test(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    pub fn depth_write(mut self, enable: bool) -> Self {
        self.depth_write = enable;
        self
    }

    pub fn compare_op(mut self, op: vk::CompareOp) -> Self {
        self.compare_op = op;
        self
    }

    pub fn depth_bounds(mut self, min: f32, max: f32) -> Self {
        self.depth_bounds = Some((min, max));
        self
    }

    pub fn stencil(mut self, front: vk::StencilOpState, back: vk::StencilOpState) -> Self {
        self.stencil = Some((front, back));
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColorBlendAttachmentStateDesc {
    pub blend: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
    pub write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachmentStateDesc {
    fn default() -> Self {
        Self {
            blend: false,
            src_color: vk::BlendFactor::ONE,
            dst_color: vk::BlendFactor::ZERO,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
            write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachmentStateDesc {
    /// Standard "over" alpha blending
    pub fn alpha_blend() -> Self {
        Self {
            blend: true,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            ..Default::default()
        }
    }

    pub fn color(mut self, src: vk::BlendFactor, dst: vk::BlendFactor, op: vk::BlendOp) -> Self {
        self.blend = true;
        self.src_color = src;
        self.dst_color = dst;
        self.color_op = op;
        self
    }

    pub fn alpha(mut self, src: vk::BlendFactor, dst: vk::BlendFactor, op: vk::BlendOp) -> Self {
        self.blend = true;
        self.src_alpha = src;
        self.dst_alpha = dst;
        self.alpha_op = op;
        self
    }

    pub fn write_mask(mut self, mask: vk::ColorComponentFlags) -> Self {
        self.write_mask = mask;
        self
    }

    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend.into(),
            src_color_blend_factor: self.src_color,
            dst_color_blend_factor: self.dst_color,
            color_blend_op: self.color_op,
            src_alpha_blend_factor: self.src_alpha,
            dst_alpha_blend_factor: self.dst_alpha,
            alpha_blend_op: self.alpha_op,
            color_write_mask: self.write_mask,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColorBlendStateDesc {
    pub logic_op: Option<vk::LogicOp>,
    pub attachments: Vec<ColorBlendAttachmentStateDesc>,
    pub blend_constants: [f32; 4],
}

impl ColorBlendStateDesc {
    pub fn attachment(mut self, attachment: ColorBlendAttachmentStateDesc) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn logic_op(mut self, op: vk::LogicOp) -> Self {
        self.logic_op = Some(op);
        self
    }

    pub fn blend_constants(mut self, constants: [f32; 4]) -> Self {
        self.blend_constants = constants;
        self
    }
}

/// Everything needed to build a graphics pipeline.
///
/// Viewport and scissor are always dynamic, so pipelines survive swapchain
/// recreation.
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub shaders: Vec<Arc<ShaderModule>>,
    pub vertex_input: VertexInputStateDesc,
    pub input_assembly: InputAssemblyStateDesc,
    pub rasterization: RasterizationStateDesc,
    pub multisample: MultisampleStateDesc,
    pub depth_stencil: DepthStencilStateDesc,
    pub color_blend: ColorBlendStateDesc,
    pub extra_dynamic_states: Vec<vk::DynamicState>,
    pub layout: Arc<PipelineLayout>,
    pub render_pass: Arc<RenderPass>,
    pub subpass: u32,
}

impl GraphicsPipelineDesc {
    pub fn new(layout: Arc<PipelineLayout>, render_pass: Arc<RenderPass>) -> Self {
        Self {
            shaders: Vec::new(),
            vertex_input: Default::default(),
            input_assembly: Default::default(),
            rasterization: Default::default(),
            multisample: Default::default(),
            depth_stencil: Default::default(),
            color_blend: Default::default(),
            extra_dynamic_states: Vec::new(),
            layout,
            render_pass,
            subpass: 0,
        }
    }

    pub fn shader(mut self, shader: Arc<ShaderModule>) -> Self {
        self.shaders.push(shader);
        self
    }

    pub fn vertex_input(mut self, state: VertexInputStateDesc) -> Self {
        self.vertex_input = state;
        self
    }

    pub fn input_assembly(mut self, state: InputAssemblyStateDesc) -> Self {
        self.input_assembly = state;
        self
    }

    pub fn rasterization(mut self, state: RasterizationStateDesc) -> Self {
        self.rasterization = state;
        self
    }

    pub fn multisample(mut self, state: MultisampleStateDesc) -> Self {
        self.multisample = state;
        self
    }

    pub fn depth_stencil(mut self, state: DepthStencilStateDesc) -> Self {
        self.depth_stencil = state;
        self
    }

    pub fn color_blend(mut self, state: ColorBlendStateDesc) -> Self {
        self.color_blend = state;
        self
    }

    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        self.extra_dynamic_states.push(state);
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }

    fn dynamic_states(&self) -> Vec<vk::DynamicState> {
        let mut states = vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        for state in &self.extra_dynamic_states {
            if !states.contains(state) {
                states.push(*state);
            }
        }
        states
    }
}

pub struct GraphicsPipeline {
    pub handle: vk::Pipeline,
    pub desc: GraphicsPipelineDesc,
}

impl GraphicsPipeline {
    pub fn new(device: &Arc<Device>, desc: GraphicsPipelineDesc) -> Result<Arc<Self>> {
        if desc.shaders.is_empty() {
            anyhow::bail!("Graphics pipeline needs at least one shader stage");
        }

        let stages: Vec<vk::PipelineShaderStageCreateInfo> =
            desc.shaders.iter().map(|s| s.stage_info()).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&desc.vertex_input.bindings)
            .vertex_attribute_descriptions(&desc.vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.input_assembly.topology)
            .primitive_restart_enable(desc.input_assembly.primitive_restart);

        // Counts only; the actual rects are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let raster = &desc.rasterization;
        let (bias_constant, bias_clamp, bias_slope) = raster.depth_bias.unwrap_or((0.0, 0.0, 0.0));
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(raster.depth_clamp)
            .rasterizer_discard_enable(raster.rasterizer_discard)
            .polygon_mode(raster.polygon_mode)
            .cull_mode(raster.cull_mode)
            .front_face(raster.front_face)
            .depth_bias_enable(raster.depth_bias.is_some())
            .depth_bias_constant_factor(bias_constant)
            .depth_bias_clamp(bias_clamp)
            .depth_bias_slope_factor(bias_slope)
            .line_width(raster.line_width);

        let ms = &desc.multisample;
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(ms.samples)
            .sample_shading_enable(ms.min_sample_shading.is_some())
            .min_sample_shading(ms.min_sample_shading.unwrap_or(0.0))
            .alpha_to_coverage_enable(ms.alpha_to_coverage)
            .alpha_to_one_enable(ms.alpha_to_one);

        let ds = &desc.depth_stencil;
        let (min_bounds, max_bounds) = ds.depth_bounds.unwrap_or((0.0, 1.0));
        let (front, back) = ds.stencil.unwrap_or_default();
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(ds.depth_test)
            .depth_write_enable(ds.depth_write)
            .depth_compare_op(ds.compare_op)
            .depth_bounds_test_enable(ds.depth_bounds.is_some())
            .min_depth_bounds(min_bounds)
            .max_depth_bounds(max_bounds)
            .stencil_test_enable(ds.stencil.is_some())
            .front(front)
            .back(back);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_blend
            .attachments
            .iter()
            .map(|a| a.to_vk())
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(desc.color_blend.logic_op.is_some())
            .logic_op(desc.color_blend.logic_op.unwrap_or(vk::LogicOp::COPY))
            .attachments(&blend_attachments)
            .blend_constants(desc.color_blend.blend_constants);

        let dynamic_states = desc.dynamic_states();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout.handle)
            .render_pass(desc.render_pass.handle)
            .subpass(desc.subpass)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;

        let handle = pipelines
            .into_iter()
            .next()
            .context("Driver returned no pipeline")?;

        Ok(Arc::new(Self { handle, desc }))
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.desc.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.desc.layout.device.device.destroy_pipeline(self.handle, None) };
    }
}

pub struct ComputePipeline {
    pub handle: vk::Pipeline,
    layout: Arc<PipelineLayout>,
    _shader: Arc<ShaderModule>,
}

impl ComputePipeline {
    pub fn new(
        device: &Arc<Device>,
        shader: Arc<ShaderModule>,
        layout: Arc<PipelineLayout>,
    ) -> Result<Arc<Self>> {
        if shader.stage != vk::ShaderStageFlags::COMPUTE {
            anyhow::bail!("Compute pipeline needs a compute shader, got {:?}", shader.stage);
        }

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(shader.stage_info())
            .layout(layout.handle)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| e)
        .context("Failed to create compute pipeline")?;

        let handle = pipelines
            .into_iter()
            .next()
            .context("Driver returned no pipeline")?;

        Ok(Arc::new(Self {
            handle,
            layout,
            _shader: shader,
        }))
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe { self.layout.device.device.destroy_pipeline(self.handle, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_input_collects_bindings_and_attributes() {
        let state = VertexInputStateDesc::default()
            .binding(0, 24, vk::VertexInputRate::VERTEX)
            .attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
            .attribute(1, 0, vk::Format::R32G32B32_SFLOAT, 12);

        assert_eq!(state.bindings.len(), 1);
        assert_eq!(state.bindings[0].stride, 24);
        assert_eq!(state.attributes[1].offset, 12);
    }

    #[test]
    fn alpha_blend_enables_blending() {
        let blend = ColorBlendAttachmentStateDesc::alpha_blend().to_vk();
        assert_eq!(blend.blend_enable, vk::TRUE);
        assert_eq!(blend.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);

        let opaque = ColorBlendAttachmentStateDesc::default().to_vk();
        assert_eq!(opaque.blend_enable, vk::FALSE);
    }

    #[test]
    fn depth_stencil_defaults_and_disabled() {
        let depth = DepthStencilStateDesc::default();
        assert!(depth.depth_test && depth.depth_write);
        assert_eq!(depth.compare_op, vk::CompareOp::LESS);

        let off = DepthStencilStateDesc::disabled();
        assert!(!off.depth_test && !off.depth_write);
    }

    #[test]
    fn rasterization_builder_chains() {
        let raster = RasterizationStateDesc::default()
            .cull_mode(vk::CullModeFlags::NONE)
            .polygon_mode(vk::PolygonMode::LINE)
            .depth_bias(1.25, 0.0, 1.75);

        assert_eq!(raster.cull_mode, vk::CullModeFlags::NONE);
        assert_eq!(raster.polygon_mode, vk::PolygonMode::LINE);
        assert_eq!(raster.depth_bias, Some((1.25, 0.0, 1.75)));
    }

    fn push_range(offset: u32, size: u32) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset,
            size,
        }
    }

    #[test]
    fn push_constants_within_limit() {
        let ranges = [push_range(0, 64), push_range(64, 64)];
        assert!(check_push_constants(&ranges, 128).is_ok());
    }

    #[test]
    fn push_constants_past_limit_rejected() {
        assert!(check_push_constants(&[push_range(64, 72)], 128).is_err());
    }

    #[test]
    fn push_constant_offset_overflow_rejected() {
        assert!(check_push_constants(&[push_range(u32::MAX - 3, 8)], 128).is_err());
    }
}
