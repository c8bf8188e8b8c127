//! Unity Native Plugin Interface定義
//!
//! IUnityInterfaces経由で取得できる各インターフェースのABI宣言。
//! レイアウトはUnity側のCヘッダ（IUnityInterface.h / IUnityGraphics.h /
//! IUnityGraphicsVulkan.h / IUnityGraphicsD3D11.h）に一致させている。
//! Vulkanのハンドル型には`ash::vk`のrepr(transparent)型をそのまま使用する。

#![allow(dead_code)]

use ash::vk;
use libc::{c_char, c_int, c_longlong, c_uint, c_ulonglong, c_void};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnityInterfaceGUID {
    pub guid_high: c_ulonglong,
    pub guid_low: c_ulonglong,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IUnityInterface {}

#[repr(C)]
pub struct IUnityInterfaces {
    pub get_interface: extern "system" fn(guid: UnityInterfaceGUID) -> *mut IUnityInterface,
    pub register_interface: extern "system" fn(guid: UnityInterfaceGUID, ptr: *mut IUnityInterface),
    pub get_interface_split:
        extern "system" fn(guid_high: c_longlong, guid_low: c_longlong) -> *mut IUnityInterface,
    pub register_interface_split: extern "system" fn(
        guid_high: c_longlong,
        guid_low: c_longlong,
        ptr: *mut IUnityInterface,
    ),
}

pub type UnityGfxRenderer = c_int;
pub const K_UNITY_GFX_RENDERER_D3D11: UnityGfxRenderer = 2;
pub const K_UNITY_GFX_RENDERER_VULKAN: UnityGfxRenderer = 21;

pub type UnityGfxDeviceEventType = c_int;
pub const K_UNITY_GFX_DEVICE_EVENT_INITIALIZE: UnityGfxDeviceEventType = 0;
pub const K_UNITY_GFX_DEVICE_EVENT_SHUTDOWN: UnityGfxDeviceEventType = 1;
pub const K_UNITY_GFX_DEVICE_EVENT_BEFORE_RESET: UnityGfxDeviceEventType = 2;
pub const K_UNITY_GFX_DEVICE_EVENT_AFTER_RESET: UnityGfxDeviceEventType = 3;

pub type IUnityGraphicsDeviceEventCallback =
    extern "system" fn(event_type: UnityGfxDeviceEventType);

#[repr(C)]
pub struct IUnityGraphics {
    pub get_renderer: extern "system" fn() -> UnityGfxRenderer,
    pub register_device_event_callback:
        extern "system" fn(callback: IUnityGraphicsDeviceEventCallback),
    pub unregister_device_event_callback:
        extern "system" fn(callback: IUnityGraphicsDeviceEventCallback),
    pub reserve_event_id_range: extern "system" fn(count: c_int) -> c_int,
}

impl IUnityGraphics {
    pub const GUID: UnityInterfaceGUID = UnityInterfaceGUID {
        guid_high: 0x7CBA0A9CA4DDB544u64,
        guid_low: 0x8C5AD4926EB17B11u64,
    };
}

/// ホストのグラフィックスコマンドキューへ積まれるイベントコールバック型
pub type UnityRenderingEvent = extern "system" fn(event_id: c_int);
pub type UnityRenderingEventAndData = extern "system" fn(event_id: c_int, data: *mut c_void);

/// RenderBuffer.GetNativeRenderBufferPtr()が返す不透明ハンドル
pub type UnityRenderBuffer = *mut c_void;

// ---- Vulkan ----

#[repr(C)]
pub struct UnityVulkanInstance {
    pub pipeline_cache: vk::PipelineCache,
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
    pub graphics_queue: vk::Queue,
    pub get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    pub queue_family_index: c_uint,
    pub _resv: [*mut c_void; 8],
}

#[repr(C)]
pub struct UnityVulkanMemory {
    pub memory: vk::DeviceMemory,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub mapped: *mut c_void,
    pub flags: vk::MemoryPropertyFlags,
    pub memory_type_index: c_uint,
    pub _resv: [*mut c_void; 4],
}

pub type UnityVulkanResourceAccessMode = c_uint;
pub const K_UNITY_VULKAN_RESOURCE_ACCESS_OBSERVE_ONLY: UnityVulkanResourceAccessMode = 0;
pub const K_UNITY_VULKAN_RESOURCE_ACCESS_PIPELINE_BARRIER: UnityVulkanResourceAccessMode = 1;
pub const K_UNITY_VULKAN_RESOURCE_ACCESS_RECREATES: UnityVulkanResourceAccessMode = 2;

#[repr(C)]
pub struct UnityVulkanImage {
    pub memory: UnityVulkanMemory,
    pub image: vk::Image,
    pub layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub usage: vk::ImageUsageFlags,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub tiling: vk::ImageTiling,
    pub type_: vk::ImageType,
    pub samples: vk::SampleCountFlags,
    pub layers: c_int,
    pub mip_count: c_int,
    pub _resv: [*mut c_void; 4],
}

#[repr(C)]
pub struct UnityVulkanRecordingState {
    pub command_buffer: vk::CommandBuffer,
    pub command_buffer_level: vk::CommandBufferLevel,
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub sub_pass_index: c_int,
    /// 現在記録中のフレーム番号
    pub current_frame_number: c_ulonglong,
    /// GPUでの実行が完了済みのフレーム番号
    ///
    /// `current_frame_number`時点で記録したコマンドは、後続フレームで
    /// `safe_frame_number >= そのフレーム番号`になった時点で完了が保証される。
    pub safe_frame_number: c_ulonglong,
    pub _resv: [*mut c_void; 4],
}

pub type UnityVulkanEventRenderPassPreCondition = c_int;
pub const K_UNITY_VULKAN_RENDER_PASS_DONT_CARE: UnityVulkanEventRenderPassPreCondition = 0;
pub const K_UNITY_VULKAN_RENDER_PASS_ENSURE_INSIDE: UnityVulkanEventRenderPassPreCondition = 1;
pub const K_UNITY_VULKAN_RENDER_PASS_ENSURE_OUTSIDE: UnityVulkanEventRenderPassPreCondition = 2;

pub type UnityVulkanGraphicsQueueAccess = c_uint;
pub const K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_DONT_CARE: UnityVulkanGraphicsQueueAccess = 0;
pub const K_UNITY_VULKAN_GRAPHICS_QUEUE_ACCESS_ALLOW: UnityVulkanGraphicsQueueAccess = 1;

pub type UnityVulkanEventConfigFlagBits = c_uint;
pub const K_UNITY_VULKAN_EVENT_CONFIG_FLAG_ENSURE_PREVIOUS_FRAME_SUBMISSION:
    UnityVulkanEventConfigFlagBits = 1 << 0;
pub const K_UNITY_VULKAN_EVENT_CONFIG_FLAG_FLUSH_COMMAND_BUFFERS: UnityVulkanEventConfigFlagBits =
    1 << 1;
pub const K_UNITY_VULKAN_EVENT_CONFIG_FLAG_SYNC_WORKER_THREADS: UnityVulkanEventConfigFlagBits =
    1 << 2;
pub const K_UNITY_VULKAN_EVENT_CONFIG_FLAG_MODIFIES_COMMAND_BUFFERS_STATE:
    UnityVulkanEventConfigFlagBits = 1 << 3;

#[repr(C)]
#[derive(Clone)]
pub struct UnityVulkanPluginEventConfig {
    pub render_pass_precondition: UnityVulkanEventRenderPassPreCondition,
    pub graphics_queue_access: UnityVulkanGraphicsQueueAccess,
    pub flags: u32,
}

/// サブリソース指定にnullを渡すとイメージ全体が対象になる
pub const UNITY_VULKAN_WHOLE_IMAGE: *const vk::ImageSubresource = std::ptr::null();

pub type UnityVulkanInitCallback = extern "system" fn(
    get_instance_proc_addr: vk::PFN_vkGetInstanceProcAddr,
    userdata: *mut c_void,
) -> vk::PFN_vkGetInstanceProcAddr;

pub type UnityVulkanSwapchainMode = c_uint;
pub const K_UNITY_VULKAN_SWAPCHAIN_MODE_DEFAULT: UnityVulkanSwapchainMode = 0;
pub const K_UNITY_VULKAN_SWAPCHAIN_MODE_OFFSCREEN: UnityVulkanSwapchainMode = 1;

#[repr(C)]
#[derive(Clone)]
pub struct UnityVulkanSwapchainConfiguration {
    pub mode: UnityVulkanSwapchainMode,
}

#[repr(C)]
pub struct IUnityGraphicsVulkan {
    pub intercept_initialization:
        extern "system" fn(func: UnityVulkanInitCallback, userdata: *mut c_void) -> bool,
    pub intercept_vulkan_api: extern "system" fn(
        name: *const c_char,
        func: vk::PFN_vkVoidFunction,
    ) -> vk::PFN_vkVoidFunction,
    pub configure_event: extern "system" fn(
        event_id: c_int,
        plugin_event_config: *const UnityVulkanPluginEventConfig,
    ),
    pub instance: extern "system" fn() -> UnityVulkanInstance,
    pub command_recording_state: extern "system" fn(
        out_command_recording_state: *mut UnityVulkanRecordingState,
        queue_access: UnityVulkanGraphicsQueueAccess,
    ) -> bool,
    pub access_texture: extern "system" fn(
        native_texture: *mut c_void,
        sub_resource: *const vk::ImageSubresource,
        layout: vk::ImageLayout,
        pipeline_stage_flags: vk::PipelineStageFlags,
        access_flags: vk::AccessFlags,
        access_mode: UnityVulkanResourceAccessMode,
        out_image: *mut UnityVulkanImage,
    ) -> bool,
    pub access_render_buffer_texture: extern "system" fn(
        native_render_buffer: UnityRenderBuffer,
        sub_resource: *const vk::ImageSubresource,
        layout: vk::ImageLayout,
        pipeline_stage_flags: vk::PipelineStageFlags,
        access_flags: vk::AccessFlags,
        access_mode: UnityVulkanResourceAccessMode,
        out_image: *mut UnityVulkanImage,
    ) -> bool,
    pub access_render_buffer_resolve_texture: extern "system" fn(
        native_render_buffer: UnityRenderBuffer,
        sub_resource: *const vk::ImageSubresource,
        layout: vk::ImageLayout,
        pipeline_stage_flags: vk::PipelineStageFlags,
        access_flags: vk::AccessFlags,
        access_mode: UnityVulkanResourceAccessMode,
        out_image: *mut UnityVulkanImage,
    ) -> bool,
    pub access_buffer: extern "system" fn(
        native_buffer: *mut c_void,
        pipeline_stage_flags: vk::PipelineStageFlags,
        access_flags: vk::AccessFlags,
        access_mode: UnityVulkanResourceAccessMode,
        out_buffer: *mut UnityVulkanBuffer,
    ) -> bool,
    pub ensure_outside_render_pass: extern "system" fn(),
    pub ensure_inside_render_pass: extern "system" fn(),
    pub access_queue: extern "system" fn(
        callback: UnityRenderingEventAndData,
        event_id: c_int,
        user_data: *mut c_void,
        flush: bool,
    ),
    pub configure_swapchain:
        extern "system" fn(swap_chain_config: *const UnityVulkanSwapchainConfiguration) -> bool,
}

impl IUnityGraphicsVulkan {
    pub const GUID: UnityInterfaceGUID = UnityInterfaceGUID {
        guid_high: 0x95355348d4ef4e11u64,
        guid_low: 0x9789313dfcffcc87u64,
    };
}

#[repr(C)]
pub struct UnityVulkanBuffer {
    pub memory: UnityVulkanMemory,
    pub buffer: vk::Buffer,
    pub size_in_bytes: isize,
    pub usage: vk::BufferUsageFlags,
    pub _resv: [*mut c_void; 4],
}

// ---- D3D11 ----

/// IUnityGraphicsD3D11（Windowsのみ意味を持つが、レイアウト宣言自体は共通）
///
/// 戻り値のCOMポインタ型はwindows crateへの依存を避けるため*mut c_voidで宣言し、
/// D3D11バックエンドアダプタ側でInterface::from_rawにより変換する。
#[repr(C)]
pub struct IUnityGraphicsD3D11 {
    pub get_device: extern "system" fn() -> *mut c_void,
    pub texture_from_render_buffer: extern "system" fn(buffer: UnityRenderBuffer) -> *mut c_void,
    pub texture_from_native_texture: extern "system" fn(texture: *mut c_void) -> *mut c_void,
    pub rtv_from_render_buffer: extern "system" fn(surface: UnityRenderBuffer) -> *mut c_void,
    pub srv_from_native_texture: extern "system" fn(texture: *mut c_void) -> *mut c_void,
}

impl IUnityGraphicsD3D11 {
    pub const GUID: UnityInterfaceGUID = UnityInterfaceGUID {
        guid_high: 0xAAB37EF87A87D748u64,
        guid_low: 0xBF76967F07EFB177u64,
    };
}
